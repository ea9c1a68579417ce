//! Watch-folder scanning and inventory bookkeeping.
//!
//! The watcher exclusively owns the in-memory inventory map (path → known
//! file). Each [`Watcher::scan`] walks the configured roots, fingerprints
//! new or changed files, diffs against the inventory, and publishes an
//! `InventoryChanged` event when anything moved. It never touches the store
//! or the queue; downstream decisions belong to the auto-enqueuer.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::WatchConfig;
use crate::events::{CoreEvent, EventBus};
use crate::hash;
use crate::models::FileEntry;

/// Files added, changed, or gone since the previous scan.
#[derive(Debug, Default)]
pub struct InventoryDiff {
    pub added: Vec<FileEntry>,
    pub modified: Vec<FileEntry>,
    pub removed: Vec<PathBuf>,
}

impl InventoryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

pub struct Watcher {
    roots: Vec<PathBuf>,
    sidecar_suffix: String,
    exclude_set: GlobSet,
    bus: EventBus,
    inventory: HashMap<PathBuf, FileEntry>,
}

impl Watcher {
    pub fn new(config: &WatchConfig, bus: EventBus) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude_globs {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            roots: config.roots.clone(),
            sidecar_suffix: config.sidecar_suffix.clone(),
            exclude_set: builder.build()?,
            bus,
            inventory: HashMap::new(),
        })
    }

    /// Snapshot of every file currently known to the inventory.
    pub fn known_files(&self) -> Vec<FileEntry> {
        let mut files: Vec<FileEntry> = self.inventory.values().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// Scan all roots, update the inventory, and return the diff.
    ///
    /// A file that vanishes between directory listing and hashing is treated
    /// as removed, not as an error. Rescanning an unchanged tree yields an
    /// empty diff and publishes nothing.
    pub fn scan(&mut self) -> Result<InventoryDiff> {
        let mut seen: HashMap<PathBuf, FileEntry> = HashMap::new();
        let mut diff = InventoryDiff::default();

        for root in &self.roots {
            if !root.exists() {
                warn!(root = %root.display(), "watch root does not exist, skipping");
                continue;
            }

            for entry in WalkDir::new(root) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        // Disappeared mid-walk or unreadable: skip, retry next scan
                        debug!(error = %e, "skipping unreadable entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }

                let path = entry.path();
                if self.is_excluded(root, path) {
                    continue;
                }

                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "file vanished mid-scan");
                        continue;
                    }
                };

                let size = metadata.len();
                let modified_at = modified_time(&metadata);

                // Rehash only when size or mtime moved; hashing is the
                // expensive part of a scan.
                let fingerprint = match self.inventory.get(path) {
                    Some(known) if known.size == size && known.modified_at == modified_at => {
                        known.fingerprint.clone()
                    }
                    _ => match hash::fingerprint_file(path) {
                        Ok(fp) => fp,
                        Err(e) => {
                            debug!(path = %path.display(), error = %e, "file vanished before hashing");
                            continue;
                        }
                    },
                };

                let file = FileEntry {
                    path: path.to_path_buf(),
                    fingerprint,
                    size,
                    modified_at,
                };

                match self.inventory.get(path) {
                    None => diff.added.push(file.clone()),
                    Some(known) if known.fingerprint != file.fingerprint => {
                        diff.modified.push(file.clone())
                    }
                    Some(_) => {}
                }

                seen.insert(file.path.clone(), file);
            }
        }

        for path in self.inventory.keys() {
            if !seen.contains_key(path) {
                diff.removed.push(path.clone());
            }
        }
        diff.removed.sort();
        diff.added.sort_by(|a, b| a.path.cmp(&b.path));
        diff.modified.sort_by(|a, b| a.path.cmp(&b.path));

        self.inventory = seen;

        if !diff.is_empty() {
            let mut paths: Vec<PathBuf> = diff
                .added
                .iter()
                .chain(diff.modified.iter())
                .map(|f| f.path.clone())
                .collect();
            paths.extend(diff.removed.iter().cloned());
            self.bus.publish(CoreEvent::InventoryChanged {
                added: diff.added.len(),
                modified: diff.modified.len(),
                removed: diff.removed.len(),
                paths,
            });
        }

        Ok(diff)
    }

    fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        // Sidecar files are the pipeline's own metadata exports; treating
        // them as content would feed the pipeline its own output.
        if name.ends_with(&self.sidecar_suffix) {
            return true;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        self.exclude_set.is_match(relative.to_string_lossy().as_ref())
    }
}

/// Modification time as UTC, epoch when unavailable.
pub fn modified_time(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    system_time_to_utc(metadata.modified().ok())
}

fn system_time_to_utc(time: Option<std::time::SystemTime>) -> DateTime<Utc> {
    let secs = time
        .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

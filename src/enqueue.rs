//! Auto-enqueueing of unanalyzed files.
//!
//! Reacts to inventory changes by deciding, per known file, whether work is
//! needed. The store's analyzed predicate is the single source of truth for
//! dedup, never a local cache, since the store may be updated out-of-band.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::FileEntry;
use crate::queue::WorkQueue;
use crate::store::ResultStore;

pub struct AutoEnqueuer {
    store: ResultStore,
    queue: Arc<WorkQueue>,
}

impl AutoEnqueuer {
    pub fn new(store: ResultStore, queue: Arc<WorkQueue>) -> Self {
        Self { store, queue }
    }

    /// Evaluate one inventory batch and enqueue whatever needs analysis.
    /// Returns the number of items enqueued.
    ///
    /// Evaluation order per file: queue duplicate check, on-disk existence
    /// (the file may have vanished between scan and evaluation), then the
    /// store's analyzed predicate. A store error skips the file for this
    /// pass only; the next inventory event retries it. Running the same
    /// inventory twice therefore enqueues nothing new and loses nothing.
    pub async fn evaluate(&mut self, files: &[FileEntry]) -> usize {
        let mut enqueued = 0;

        for file in files {
            if self.queue.is_pending(&file.path) {
                continue;
            }

            if !file.path.exists() {
                debug!(path = %file.path.display(), "file gone before evaluation");
                continue;
            }

            match self.store.is_analyzed(&file.fingerprint).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "store unavailable, skipping this pass");
                    continue;
                }
            }

            if self.queue.add(file) {
                enqueued += 1;
            }
        }

        enqueued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::hash;
    use crate::models::{Analysis, Tag};
    use chrono::Utc;
    use std::path::Path;

    async fn setup() -> (tempfile::TempDir, ResultStore, Arc<WorkQueue>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(&dir.path().join("sdx.sqlite"))
            .await
            .unwrap();
        let queue = Arc::new(WorkQueue::new(EventBus::default()));
        (dir, store, queue)
    }

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> FileEntry {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        FileEntry {
            fingerprint: hash::fingerprint_file(&path).unwrap(),
            size: content.len() as u64,
            modified_at: Utc::now(),
            path,
        }
    }

    fn analyzed(fingerprint: &str) -> Analysis {
        Analysis {
            path: "/archive/old.pdf".into(),
            fingerprint: fingerprint.to_string(),
            file_type: "pdf".to_string(),
            file_size: 1,
            modified_at: Utc::now(),
            ocr_mode: "fast".to_string(),
            pages: vec![],
            tags: vec![Tag {
                number: 1,
                label: "letter".to_string(),
            }],
            description: "old letter".to_string(),
            confidence: 0.9,
            model: "m".to_string(),
        }
    }

    #[tokio::test]
    async fn enqueues_unanalyzed_files_in_order() {
        let (dir, store, queue) = setup().await;
        let files = vec![
            write_file(dir.path(), "a.pdf", b"alpha"),
            write_file(dir.path(), "b.pdf", b"beta"),
        ];

        let mut enqueuer = AutoEnqueuer::new(store, queue.clone());
        assert_eq!(enqueuer.evaluate(&files).await, 2);

        let order: Vec<_> = queue.snapshot().into_iter().map(|i| i.path).collect();
        assert_eq!(order, vec![files[0].path.clone(), files[1].path.clone()]);
    }

    #[tokio::test]
    async fn repeated_evaluation_is_idempotent() {
        let (dir, store, queue) = setup().await;
        let files = vec![write_file(dir.path(), "a.pdf", b"alpha")];

        let mut enqueuer = AutoEnqueuer::new(store, queue.clone());
        assert_eq!(enqueuer.evaluate(&files).await, 1);
        assert_eq!(enqueuer.evaluate(&files).await, 0);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn dedup_is_by_content_not_path() {
        let (dir, store, queue) = setup().await;
        // Two paths, identical content; the content was already analyzed
        // under some third path.
        let copy_a = write_file(dir.path(), "scan (1).pdf", b"same bytes");
        let copy_b = write_file(dir.path(), "scan (2).pdf", b"same bytes");
        store.persist(&analyzed(&copy_a.fingerprint)).await.unwrap();

        let mut enqueuer = AutoEnqueuer::new(store, queue.clone());
        assert_eq!(enqueuer.evaluate(&[copy_a, copy_b]).await, 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn vanished_file_is_skipped_without_error() {
        let (dir, store, queue) = setup().await;
        let ghost = write_file(dir.path(), "ghost.pdf", b"boo");
        std::fs::remove_file(&ghost.path).unwrap();

        let mut enqueuer = AutoEnqueuer::new(store, queue.clone());
        assert_eq!(enqueuer.evaluate(&[ghost]).await, 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn store_error_skips_the_pass() {
        let (dir, store, queue) = setup().await;
        let file = write_file(dir.path(), "a.pdf", b"alpha");

        store.close().await;

        let mut enqueuer = AutoEnqueuer::new(store, queue.clone());
        assert_eq!(enqueuer.evaluate(&[file]).await, 0);
        assert!(queue.is_empty());
    }
}

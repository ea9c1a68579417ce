//! Core data types used throughout scandex.
//!
//! These types represent the files, pages, tags, and work items that flow
//! through the ingestion and processing pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// A file known to the watcher's inventory.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Content fingerprint (hex SHA-256). Identity for dedup purposes.
    pub fingerprint: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// State of a work item in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemState {
    Pending,
    InFlight,
    Done,
    Failed,
}

impl ItemState {
    /// Pending and in-flight items count as active (unfinished) work.
    pub fn is_active(self) -> bool {
        matches!(self, ItemState::Pending | ItemState::InFlight)
    }
}

/// Ephemeral work item owned by the queue. Never persisted.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub path: PathBuf,
    /// Fingerprint snapshot taken at enqueue time.
    pub fingerprint: String,
    pub enqueued_at: DateTime<Utc>,
    pub state: ItemState,
    /// Failure reason, set when `state == Failed`.
    pub reason: Option<String>,
}

/// One page of OCR output.
#[derive(Debug, Clone)]
pub struct OcrPage {
    pub page_number: i64,
    pub text: String,
    pub confidence: f64,
}

/// A classification tag assigned by the model.
#[derive(Debug, Clone)]
pub struct Tag {
    pub number: i64,
    pub label: String,
}

/// Classifier output for one file.
#[derive(Debug, Clone)]
pub struct ClassifyResult {
    pub tags: Vec<Tag>,
    pub description: String,
    pub confidence: f64,
    pub model: String,
}

/// Everything the pipeline persists for one file in a single transaction.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub path: PathBuf,
    pub fingerprint: String,
    pub file_type: String,
    pub file_size: u64,
    pub modified_at: DateTime<Utc>,
    pub ocr_mode: String,
    pub pages: Vec<OcrPage>,
    pub tags: Vec<Tag>,
    pub description: String,
    pub confidence: f64,
    pub model: String,
}

/// Per-item pipeline outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Processed,
    Failed,
    /// Found already analyzed at claim time; not an error.
    Skipped,
}

/// Aggregate counts for one processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl BatchStats {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Processed => self.processed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

/// A full-text search hit over OCR text or classification text.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub file_id: String,
    pub file_path: String,
    pub fingerprint: String,
    pub snippet: String,
    pub rank: f64,
    /// "page" or "classification".
    pub matched_in: String,
}

//! Processing run orchestration.
//!
//! A run consumes one queue snapshot and drives each item through
//! OCR → classification → persist. Items are claimed atomically, failures
//! are isolated per item, and a recoverable "model not provisioned" failure
//! triggers one automatic pull before the retry policy gives up. The run
//! never continues past the snapshot taken at start: newly enqueued items
//! wait for the next run, so a run always terminates.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::events::{CoreEvent, EventBus};
use crate::llm::{self, Classifier, LlmError};
use crate::models::{Analysis, BatchStats, Outcome, QueueItem};
use crate::ocr::OcrEngine;
use crate::provision::Provisioner;
use crate::queue::WorkQueue;
use crate::store::ResultStore;

/// How many classification attempts an item gets. Attempt one is always
/// made; a failed attempt is retried only after successful auto-provisioning
/// of the missing model. Default is 2 (exactly one retry).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Cooperative cancellation shared between a run and its owner.
///
/// Checked between phases and raced against network calls, so a cancel
/// takes effect mid-flight without corrupting queue or store state.
#[derive(Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            // Register with the Notify before re-checking the flag, so a
            // cancel landing between the check and the await is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

pub struct Pipeline {
    store: ResultStore,
    ocr: Arc<dyn OcrEngine>,
    classifier: Arc<dyn Classifier>,
    provisioner: Arc<dyn Provisioner>,
    bus: EventBus,
    ocr_mode: String,
    auto_pull_models: bool,
    retry: RetryPolicy,
    concurrency: usize,
    cancel: CancelFlag,
}

enum ItemResult {
    Completed {
        outcome: Outcome,
        reason: Option<String>,
        auto_provisioned: bool,
    },
    /// Claim lost to another run, or item removed. Counts nothing.
    NotClaimed,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: ResultStore,
        ocr: Arc<dyn OcrEngine>,
        classifier: Arc<dyn Classifier>,
        provisioner: Arc<dyn Provisioner>,
        bus: EventBus,
        ocr_mode: String,
        auto_pull_models: bool,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            ocr,
            classifier,
            provisioner,
            bus,
            ocr_mode,
            auto_pull_models,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
            },
            concurrency: concurrency.max(1),
            cancel: CancelFlag::new(),
        })
    }

    /// Handle for cancelling an in-progress run.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Process one snapshot of the queue to completion.
    ///
    /// Items run FIFO when `concurrency == 1` (the default). Higher
    /// concurrency fans out across a bounded worker set; item order is then
    /// explicitly not FIFO, but each item's own phases stay ordered.
    pub async fn run(self: &Arc<Self>, queue: &Arc<WorkQueue>) -> BatchStats {
        let snapshot = queue.snapshot();
        let mut stats = BatchStats::default();

        if self.concurrency == 1 {
            for item in snapshot {
                if self.cancel.is_cancelled() {
                    break;
                }
                if let ItemResult::Completed { outcome, .. } =
                    self.process_item(queue, &item).await
                {
                    stats.record(outcome);
                }
            }
        } else {
            let semaphore = Arc::new(Semaphore::new(self.concurrency));
            let mut set = JoinSet::new();

            for item in snapshot {
                if self.cancel.is_cancelled() {
                    break;
                }
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("semaphore closed");
                let pipeline = Arc::clone(self);
                let queue = Arc::clone(queue);
                set.spawn(async move {
                    let _permit = permit;
                    pipeline.process_item(&queue, &item).await
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(ItemResult::Completed { outcome, .. }) => stats.record(outcome),
                    Ok(ItemResult::NotClaimed) => {}
                    Err(e) => warn!(error = %e, "pipeline worker panicked"),
                }
            }
        }

        info!(
            processed = stats.processed,
            failed = stats.failed,
            skipped = stats.skipped,
            "batch completed"
        );
        self.bus.publish(CoreEvent::BatchCompleted {
            processed: stats.processed,
            failed: stats.failed,
            skipped: stats.skipped,
        });

        stats
    }

    async fn process_item(&self, queue: &WorkQueue, item: &QueueItem) -> ItemResult {
        let Some(claimed) = queue.claim(&item.path) else {
            return ItemResult::NotClaimed;
        };

        let result = self.run_phases(queue, &claimed).await;

        if let ItemResult::Completed {
            outcome,
            ref reason,
            auto_provisioned,
        } = result
        {
            self.bus.publish(CoreEvent::ItemCompleted {
                path: claimed.path.clone(),
                outcome,
                reason: reason.clone(),
                auto_provisioned,
            });
        }

        result
    }

    async fn run_phases(&self, queue: &WorkQueue, item: &QueueItem) -> ItemResult {
        // Another producer may have analyzed this content since enqueue.
        match self.store.is_analyzed(&item.fingerprint).await {
            Ok(true) => {
                queue.mark_done(&item.path);
                return ItemResult::Completed {
                    outcome: Outcome::Skipped,
                    reason: None,
                    auto_provisioned: false,
                };
            }
            Ok(false) => {}
            Err(e) => {
                // Store unavailable: re-queue rather than lose the work.
                warn!(path = %item.path.display(), error = %e, "store check failed, re-queueing");
                queue.release(&item.path);
                return ItemResult::Completed {
                    outcome: Outcome::Failed,
                    reason: Some(format!("store unavailable: {}", e)),
                    auto_provisioned: false,
                };
            }
        }

        let metadata = match tokio::fs::metadata(&item.path).await {
            Ok(m) => m,
            Err(e) => {
                return self.fail(queue, item, format!("file vanished: {}", e), false);
            }
        };

        // OCR phase
        let pages = tokio::select! {
            _ = self.cancel.cancelled() => {
                return self.fail(queue, item, "cancelled".to_string(), false);
            }
            result = self.ocr.recognize(&item.path, &self.ocr_mode) => match result {
                Ok(pages) => pages,
                Err(e) => return self.fail(queue, item, e.to_string(), false),
            }
        };

        // Classification phase
        let ocr_text = pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let file_name = item
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_type = file_type_of(&item.path);
        let prompt = llm::build_prompt(&file_name, &file_type, &ocr_text);

        let mut auto_provisioned = false;
        let mut attempt = 0u32;
        let classified = loop {
            attempt += 1;

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return self.fail(queue, item, "cancelled".to_string(), auto_provisioned);
                }
                result = self.classifier.classify(&prompt) => result,
            };

            match result {
                Ok(classified) => break classified,
                Err(LlmError::ModelNotFound(model))
                    if self.auto_pull_models
                        && !auto_provisioned
                        && attempt < self.retry.max_attempts =>
                {
                    info!(model, "model not provisioned, pulling");
                    let pulled = tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return self.fail(queue, item, "cancelled".to_string(), false);
                        }
                        pulled = self.provisioner.fetch(&model) => pulled,
                    };
                    if !pulled {
                        return self.fail(
                            queue,
                            item,
                            format!("could not provision model '{}'", model),
                            false,
                        );
                    }
                    auto_provisioned = true;
                }
                Err(e) => {
                    return self.fail(queue, item, e.to_string(), auto_provisioned);
                }
            }
        };

        // Persisting phase: one transaction, so a crash never leaves a file
        // with partial children.
        let analysis = Analysis {
            path: item.path.clone(),
            fingerprint: item.fingerprint.clone(),
            file_type,
            file_size: metadata.len(),
            modified_at: crate::watcher::modified_time(&metadata),
            ocr_mode: self.ocr_mode.clone(),
            pages,
            tags: classified.tags,
            description: classified.description,
            confidence: classified.confidence,
            model: classified.model,
        };

        if let Err(e) = self.store.persist(&analysis).await {
            warn!(path = %item.path.display(), error = %e, "persist failed, re-queueing");
            queue.release(&item.path);
            return ItemResult::Completed {
                outcome: Outcome::Failed,
                reason: Some(format!("store unavailable: {}", e)),
                auto_provisioned,
            };
        }

        queue.mark_done(&item.path);
        ItemResult::Completed {
            outcome: Outcome::Processed,
            reason: None,
            auto_provisioned,
        }
    }

    fn fail(
        &self,
        queue: &WorkQueue,
        item: &QueueItem,
        reason: String,
        auto_provisioned: bool,
    ) -> ItemResult {
        warn!(path = %item.path.display(), reason, "item failed");
        queue.mark_failed(&item.path, &reason);
        ItemResult::Completed {
            outcome: Outcome::Failed,
            reason: Some(reason),
            auto_provisioned,
        }
    }
}

fn file_type_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

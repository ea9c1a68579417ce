//! The work queue.
//!
//! An ordered, dedup-suppressed list of pending items. The queue is the
//! single mutation point for work-item state: the pipeline claims items
//! (pending → in-flight) through [`WorkQueue::claim`], which is an atomic
//! test-and-set under the queue mutex, so two overlapping processing runs
//! can never double-claim the same item.
//!
//! Duplicate suppression: a path already held as pending, in-flight, or
//! failed cannot be re-added. Done items are dropped immediately and stop
//! blocking; failed items block until explicitly removed, so a broken file
//! is never silently reprocessed in a loop.

use chrono::Utc;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::events::{CoreEvent, EventBus};
use crate::models::{FileEntry, ItemState, QueueItem};

pub struct WorkQueue {
    inner: Mutex<VecDeque<QueueItem>>,
    bus: EventBus,
}

impl WorkQueue {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            bus,
        }
    }

    /// Insert at the tail. Returns false without touching the queue when
    /// the path is already held by a pending, in-flight, or failed item.
    pub fn add(&self, entry: &FileEntry) -> bool {
        let pending = {
            let mut items = self.inner.lock().expect("queue mutex poisoned");
            if items.iter().any(|i| i.path == entry.path) {
                return false;
            }
            items.push_back(QueueItem {
                path: entry.path.clone(),
                fingerprint: entry.fingerprint.clone(),
                enqueued_at: Utc::now(),
                state: ItemState::Pending,
                reason: None,
            });
            items.iter().filter(|i| i.state == ItemState::Pending).count()
        };

        debug!(path = %entry.path.display(), "enqueued");
        self.bus.publish(CoreEvent::QueueItemAdded {
            path: entry.path.clone(),
            pending,
        });
        true
    }

    /// Remove by path. No-op (false) when absent.
    pub fn remove(&self, path: &Path) -> bool {
        let pending = {
            let mut items = self.inner.lock().expect("queue mutex poisoned");
            let before = items.len();
            items.retain(|i| i.path != path);
            if items.len() == before {
                return false;
            }
            items.iter().filter(|i| i.state == ItemState::Pending).count()
        };

        self.bus.publish(CoreEvent::QueueItemRemoved {
            path: path.to_path_buf(),
            pending,
        });
        true
    }

    /// Empty the queue unconditionally. Destructive at this layer.
    pub fn clear(&self) {
        self.inner.lock().expect("queue mutex poisoned").clear();
        self.bus.publish(CoreEvent::QueueCleared);
    }

    /// Ordered copy of the current items. Insertion order defines
    /// processing order.
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.inner
            .lock()
            .expect("queue mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the path is held as pending or in-flight.
    pub fn is_pending(&self, path: &Path) -> bool {
        self.inner
            .lock()
            .expect("queue mutex poisoned")
            .iter()
            .any(|i| i.path == path && i.state.is_active())
    }

    /// Atomically claim a pending item (pending → in-flight). Returns
    /// `None` when the item is gone or already claimed.
    pub fn claim(&self, path: &Path) -> Option<QueueItem> {
        let mut items = self.inner.lock().expect("queue mutex poisoned");
        let item = items
            .iter_mut()
            .find(|i| i.path == path && i.state == ItemState::Pending)?;
        item.state = ItemState::InFlight;
        Some(item.clone())
    }

    /// Terminal success: the item is destroyed and its path becomes
    /// addable again.
    pub fn mark_done(&self, path: &Path) {
        let pending = {
            let mut items = self.inner.lock().expect("queue mutex poisoned");
            items.retain(|i| !(i.path == path && i.state == ItemState::InFlight));
            items.iter().filter(|i| i.state == ItemState::Pending).count()
        };
        self.bus.publish(CoreEvent::QueueItemRemoved {
            path: path.to_path_buf(),
            pending,
        });
    }

    /// Revert a claimed item to pending (in-flight → pending). Used when
    /// the persistence layer is unavailable: the work is re-queued instead
    /// of being silently lost or marked done.
    pub fn release(&self, path: &Path) {
        let mut items = self.inner.lock().expect("queue mutex poisoned");
        if let Some(item) = items
            .iter_mut()
            .find(|i| i.path == path && i.state == ItemState::InFlight)
        {
            item.state = ItemState::Pending;
        }
    }

    /// Terminal failure: the item stays, recorded with its reason, and
    /// keeps blocking re-adds until explicitly removed.
    pub fn mark_failed(&self, path: &Path, reason: &str) {
        let mut items = self.inner.lock().expect("queue mutex poisoned");
        if let Some(item) = items
            .iter_mut()
            .find(|i| i.path == path && i.state == ItemState::InFlight)
        {
            item.state = ItemState::Failed;
            item.reason = Some(reason.to_string());
        }
    }
}

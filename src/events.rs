//! Change notifications for the UI layer.
//!
//! Core components publish [`CoreEvent`]s onto a broadcast channel; the
//! (out of scope) UI shell subscribes to drive badges and banners. The core
//! never assumes a particular event loop: a dropped receiver or an absent
//! subscriber is not an error.

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::models::Outcome;

/// Event published by the ingestion and processing core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CoreEvent {
    /// The watcher's inventory changed after a scan.
    InventoryChanged {
        added: usize,
        modified: usize,
        removed: usize,
        /// Every path touched by this scan, for badge/banner rendering.
        paths: Vec<PathBuf>,
    },
    /// An item entered the queue.
    QueueItemAdded { path: PathBuf, pending: usize },
    /// An item left the queue (explicit removal or completion).
    QueueItemRemoved { path: PathBuf, pending: usize },
    /// The queue was emptied unconditionally.
    QueueCleared,
    /// One pipeline item finished.
    ItemCompleted {
        path: PathBuf,
        outcome: Outcome,
        reason: Option<String>,
        /// True when the item succeeded only after an automatic model pull.
        auto_provisioned: bool,
    },
    /// A processing run exhausted its snapshot.
    BatchCompleted {
        processed: u64,
        failed: u64,
        skipped: u64,
    },
    /// Intermediate status from a model pull (manifest, downloading, ...).
    ProvisionProgress { model: String, status: String },
}

/// Broadcast bus connecting the core to its observers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Silently drops it when nobody is listening.
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(CoreEvent::QueueCleared);
        match rx.recv().await.unwrap() {
            CoreEvent::QueueCleared => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        bus.publish(CoreEvent::QueueCleared);
    }
}

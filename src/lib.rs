//! # scandex
//!
//! Watch-folder ingestion, dedup, and OCR + LLM classification core.
//!
//! scandex watches configured folders, fingerprints every file by content,
//! queues the ones that were never analyzed, and drives each queued item
//! through OCR and LLM classification into a searchable SQLite store. The
//! GUI shell that normally sits on top subscribes to the event bus; the
//! core never assumes any particular UI toolkit.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────────┐   ┌────────┐   ┌──────────┐   ┌──────────┐
//! │ Watcher  │──▶│ AutoEnqueuer │──▶│ Queue  │──▶│ Pipeline │──▶│  SQLite   │
//! │ scan+hash│   │ dedup check  │   │ FIFO   │   │ OCR+LLM  │   │ FTS5      │
//! └─────────┘   └──────────────┘   └────────┘   └────┬─────┘   └──────────┘
//!                                                    │
//!                                            ┌───────▼────────┐
//!                                            │ModelProvisioner│
//!                                            │  (auto pull)   │
//!                                            └────────────────┘
//! ```
//!
//! Dedup is content-addressed: the SHA-256 fingerprint is a file's identity,
//! so moved or duplicated files are never analyzed twice. The store's
//! `is_analyzed` predicate is the single authority for that decision.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`events`] | Broadcast event bus for the UI layer |
//! | [`hash`] | Content fingerprinting |
//! | [`watcher`] | Folder scanning and inventory diffing |
//! | [`enqueue`] | Auto-enqueueing of unanalyzed files |
//! | [`queue`] | FIFO work queue with atomic claim |
//! | [`pipeline`] | OCR → classify → persist orchestration |
//! | [`ocr`] | OCR service client |
//! | [`llm`] | LLM classification client |
//! | [`provision`] | On-demand model pulls |
//! | [`store`] | Searchable result store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod enqueue;
pub mod events;
pub mod hash;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod provision;
pub mod queue;
pub mod store;
pub mod watcher;

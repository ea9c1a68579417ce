//! # scandex CLI (`sdx`)
//!
//! The `sdx` binary drives the ingestion and processing core from the
//! command line. The GUI shell links the library directly; this binary is
//! the headless equivalent.
//!
//! ## Usage
//!
//! ```bash
//! sdx --config ./config/sdx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sdx init` | Create the SQLite database and run schema migrations |
//! | `sdx scan` | Scan watch folders and report what needs analysis |
//! | `sdx run` | Scan, enqueue, and process everything pending |
//! | `sdx watch` | Run the scan/process loop until Ctrl-C |
//! | `sdx search "<query>"` | Full-text search over OCR text and tags |
//! | `sdx purge <fingerprint>` | Delete one file identity and its results |
//! | `sdx status` | Show store row counts |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use scandex::config::{self, Config};
use scandex::enqueue::AutoEnqueuer;
use scandex::events::EventBus;
use scandex::llm::OllamaClassifier;
use scandex::ocr::HttpOcr;
use scandex::pipeline::{Pipeline, RetryPolicy};
use scandex::provision::OllamaPuller;
use scandex::queue::WorkQueue;
use scandex::store::ResultStore;
use scandex::watcher::Watcher;

/// scandex — watch-folder OCR + classification with content-addressed dedup.
#[derive(Parser)]
#[command(
    name = "sdx",
    about = "scandex — watch-folder OCR + LLM classification into a searchable store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (files,
    /// pages, classifications, descriptions, FTS indexes). Idempotent.
    Init,

    /// Scan the watch folders once and report what would be analyzed.
    ///
    /// Updates nothing in the store; prints the inventory diff and how many
    /// files passed the dedup check.
    Scan,

    /// Scan, enqueue, and process one snapshot of pending files.
    Run,

    /// Periodic scan/process loop. Stops cleanly on Ctrl-C.
    Watch {
        /// Seconds between scans (overrides watch.interval_secs).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Full-text search over OCR page text and classification tags.
    Search {
        query: String,
        #[arg(long, default_value_t = 12)]
        limit: i64,
    },

    /// Delete one file identity (by content fingerprint) and all its results.
    Purge { fingerprint: String },

    /// Show store row counts.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => cmd_init(&config).await,
        Commands::Scan => cmd_scan(&config).await,
        Commands::Run => cmd_run(&config).await,
        Commands::Watch { interval } => cmd_watch(&config, interval).await,
        Commands::Search { query, limit } => cmd_search(&config, &query, limit).await,
        Commands::Purge { fingerprint } => cmd_purge(&config, &fingerprint).await,
        Commands::Status => cmd_status(&config).await,
    }
}

async fn cmd_init(config: &Config) -> Result<()> {
    let store = ResultStore::open(&config.db.path).await?;
    store.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

async fn cmd_scan(config: &Config) -> Result<()> {
    let store = ResultStore::open(&config.db.path).await?;
    let bus = EventBus::default();
    let queue = Arc::new(WorkQueue::new(bus.clone()));

    let mut watcher = Watcher::new(&config.watch, bus.clone())?;
    let diff = watcher.scan()?;

    let mut enqueuer = AutoEnqueuer::new(store.clone(), queue.clone());
    let enqueued = enqueuer.evaluate(&watcher.known_files()).await;

    println!("scan");
    println!("  added: {}", diff.added.len());
    println!("  modified: {}", diff.modified.len());
    println!("  removed: {}", diff.removed.len());
    println!("  needing analysis: {}", enqueued);
    for item in queue.snapshot() {
        println!("    {}", item.path.display());
    }

    store.close().await;
    Ok(())
}

async fn cmd_run(config: &Config) -> Result<()> {
    let store = ResultStore::open(&config.db.path).await?;
    let bus = EventBus::default();
    let queue = Arc::new(WorkQueue::new(bus.clone()));

    let mut watcher = Watcher::new(&config.watch, bus.clone())?;
    watcher.scan()?;

    let mut enqueuer = AutoEnqueuer::new(store.clone(), queue.clone());
    let enqueued = enqueuer.evaluate(&watcher.known_files()).await;
    println!("enqueued: {}", enqueued);

    let pipeline = build_pipeline(config, store.clone(), bus)?;
    let stats = pipeline.run(&queue).await;

    println!("run");
    println!("  processed: {}", stats.processed);
    println!("  failed: {}", stats.failed);
    println!("  skipped: {}", stats.skipped);
    for item in queue.snapshot() {
        if let Some(reason) = &item.reason {
            println!("  failed {}: {}", item.path.display(), reason);
        }
    }

    store.close().await;
    Ok(())
}

async fn cmd_watch(config: &Config, interval: Option<u64>) -> Result<()> {
    let store = ResultStore::open(&config.db.path).await?;
    let bus = EventBus::default();
    let queue = Arc::new(WorkQueue::new(bus.clone()));
    let mut watcher = Watcher::new(&config.watch, bus.clone())?;
    let mut enqueuer = AutoEnqueuer::new(store.clone(), queue.clone());
    let pipeline = build_pipeline(config, store.clone(), bus)?;

    let interval = Duration::from_secs(interval.unwrap_or(config.watch.interval_secs));
    println!("watching (every {}s), Ctrl-C to stop", interval.as_secs());

    loop {
        let pass = async {
            watcher.scan()?;
            let enqueued = enqueuer.evaluate(&watcher.known_files()).await;
            let stats = pipeline.run(&queue).await;
            Ok::<_, anyhow::Error>((enqueued, stats))
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                pipeline.cancel_flag().cancel();
                println!("stopping");
                break;
            }
            result = pass => {
                let (enqueued, stats) = result?;
                if enqueued > 0 || stats != Default::default() {
                    println!(
                        "pass: enqueued {} / processed {} / failed {} / skipped {}",
                        enqueued, stats.processed, stats.failed, stats.skipped
                    );
                }
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("stopping");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    store.close().await;
    Ok(())
}

async fn cmd_search(config: &Config, query: &str, limit: i64) -> Result<()> {
    let store = ResultStore::open(&config.db.path).await?;
    let hits = store.search(query, limit).await?;

    if hits.is_empty() {
        println!("No results.");
    } else {
        for (i, hit) in hits.iter().enumerate() {
            println!("{}. [{:.2}] {}", i + 1, hit.rank, hit.file_path);
            println!("    matched in: {}", hit.matched_in);
            println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
            println!("    fingerprint: {}", hit.fingerprint);
            println!();
        }
    }

    store.close().await;
    Ok(())
}

async fn cmd_purge(config: &Config, fingerprint: &str) -> Result<()> {
    let store = ResultStore::open(&config.db.path).await?;
    if store.purge(fingerprint).await? {
        println!("purged {}", fingerprint);
    } else {
        println!("no file with fingerprint {}", fingerprint);
    }
    store.close().await;
    Ok(())
}

async fn cmd_status(config: &Config) -> Result<()> {
    let store = ResultStore::open(&config.db.path).await?;
    let counts = store.counts().await?;

    println!("store {}", config.db.path.display());
    println!("  files: {}", counts.files);
    println!("  analyzed: {}", counts.analyzed);
    println!("  pages: {}", counts.pages);
    println!("  classifications: {}", counts.classifications);
    println!("  descriptions: {}", counts.descriptions);

    store.close().await;
    Ok(())
}

fn build_pipeline(config: &Config, store: ResultStore, bus: EventBus) -> Result<Arc<Pipeline>> {
    let ocr = Arc::new(
        HttpOcr::new(&config.ocr.host, config.ocr.timeout_secs)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?,
    );
    let classifier =
        Arc::new(OllamaClassifier::new(&config.llm).map_err(|e| anyhow::anyhow!(e.to_string()))?);
    let provisioner = Arc::new(OllamaPuller::new(&config.llm, bus.clone())?);

    Ok(Pipeline::new(
        store,
        ocr,
        classifier,
        provisioner,
        bus,
        config.ocr.mode.clone(),
        config.llm.auto_pull_models,
        RetryPolicy {
            max_attempts: config.llm.max_attempts,
        },
        config.pipeline.concurrency,
    ))
}

//! End-to-end processing runs against a real temp-file store, with the OCR,
//! classification, and provisioning collaborators replaced by fakes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scandex::enqueue::AutoEnqueuer;
use scandex::events::{CoreEvent, EventBus};
use scandex::llm::{Classifier, LlmError};
use scandex::models::{ClassifyResult, ItemState, OcrPage, Outcome, Tag};
use scandex::ocr::{OcrEngine, OcrError};
use scandex::pipeline::{Pipeline, RetryPolicy};
use scandex::provision::Provisioner;
use scandex::queue::WorkQueue;
use scandex::store::ResultStore;
use scandex::watcher::Watcher;

// ============ Fakes ============

/// OCR fake: one page of text per file, or a scripted failure for one name.
struct FakeOcr {
    fail_for: Option<String>,
}

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn recognize(&self, path: &Path, _mode: &str) -> Result<Vec<OcrPage>, OcrError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        if self.fail_for.as_deref() == Some(name.as_str()) {
            return Err(OcrError {
                reason: format!("scripted OCR failure for {}", name),
            });
        }
        Ok(vec![OcrPage {
            page_number: 1,
            text: format!("recognized text of {}", name),
            confidence: 0.9,
        }])
    }
}

/// Classifier fake that requires the model to be "provisioned" first.
struct FakeClassifier {
    provisioned: Arc<AtomicBool>,
    calls: AtomicUsize,
}

impl FakeClassifier {
    fn ready() -> Self {
        Self {
            provisioned: Arc::new(AtomicBool::new(true)),
            calls: AtomicUsize::new(0),
        }
    }

    fn unprovisioned() -> (Self, Arc<AtomicBool>) {
        let provisioned = Arc::new(AtomicBool::new(false));
        (
            Self {
                provisioned: provisioned.clone(),
                calls: AtomicUsize::new(0),
            },
            provisioned,
        )
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, _prompt: &str) -> Result<ClassifyResult, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.provisioned.load(Ordering::SeqCst) {
            return Err(LlmError::ModelNotFound("test-model".to_string()));
        }
        Ok(ClassifyResult {
            tags: vec![Tag {
                number: 1,
                label: "document".to_string(),
            }],
            description: "a test document".to_string(),
            confidence: 0.8,
            model: "test-model".to_string(),
        })
    }

    fn model(&self) -> &str {
        "test-model"
    }
}

/// Classifier fake that blocks until cancelled.
struct StuckClassifier;

#[async_trait]
impl Classifier for StuckClassifier {
    async fn classify(&self, _prompt: &str) -> Result<ClassifyResult, LlmError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(LlmError::Timeout)
    }

    fn model(&self) -> &str {
        "test-model"
    }
}

/// Provisioner fake: flips the shared flag on success.
struct FakeProvisioner {
    succeeds: bool,
    provisioned: Arc<AtomicBool>,
    fetches: AtomicUsize,
}

impl FakeProvisioner {
    fn noop() -> Self {
        Self {
            succeeds: true,
            provisioned: Arc::new(AtomicBool::new(true)),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn fetch(&self, _model: &str) -> bool {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.succeeds {
            self.provisioned.store(true, Ordering::SeqCst);
        }
        self.succeeds
    }
}

// ============ Harness ============

struct Harness {
    _dir: tempfile::TempDir,
    inbox: PathBuf,
    store: ResultStore,
    bus: EventBus,
    queue: Arc<WorkQueue>,
    watcher: Watcher,
    enqueuer: AutoEnqueuer,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();

    let store = ResultStore::open(&dir.path().join("sdx.sqlite"))
        .await
        .unwrap();
    let bus = EventBus::default();
    let queue = Arc::new(WorkQueue::new(bus.clone()));
    let watch = scandex::config::WatchConfig {
        roots: vec![inbox.clone()],
        sidecar_suffix: ".sdx.json".to_string(),
        exclude_globs: vec![],
        interval_secs: 60,
    };
    let watcher = Watcher::new(&watch, bus.clone()).unwrap();
    let enqueuer = AutoEnqueuer::new(store.clone(), queue.clone());

    Harness {
        _dir: dir,
        inbox,
        store,
        bus,
        queue,
        watcher,
        enqueuer,
    }
}

impl Harness {
    fn write(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.inbox.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn scan_and_enqueue(&mut self) -> usize {
        self.watcher.scan().unwrap();
        self.enqueuer.evaluate(&self.watcher.known_files()).await
    }

    fn pipeline(
        &self,
        ocr: Arc<dyn OcrEngine>,
        classifier: Arc<dyn Classifier>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Arc<Pipeline> {
        Pipeline::new(
            self.store.clone(),
            ocr,
            classifier,
            provisioner,
            self.bus.clone(),
            "fast".to_string(),
            true,
            RetryPolicy::default(),
            1,
        )
    }

    fn happy_pipeline(&self) -> Arc<Pipeline> {
        self.pipeline(
            Arc::new(FakeOcr { fail_for: None }),
            Arc::new(FakeClassifier::ready()),
            Arc::new(FakeProvisioner::noop()),
        )
    }
}

// ============ Scenarios ============

#[tokio::test]
async fn five_new_files_are_processed_fifo() {
    let mut h = harness().await;
    for i in 1..=5 {
        h.write(&format!("doc-{}.pdf", i), format!("content {}", i).as_bytes());
    }

    assert_eq!(h.scan_and_enqueue().await, 5);
    let enqueue_order: Vec<_> = h.queue.snapshot().into_iter().map(|i| i.path).collect();

    let mut rx = h.bus.subscribe();
    let stats = h.happy_pipeline().run(&h.queue).await;

    assert_eq!(stats.processed, 5);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.skipped, 0);
    assert!(h.queue.is_empty());

    // ItemCompleted events arrive in enqueue order (FIFO processing)
    let mut completed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::ItemCompleted { path, outcome, .. } = event {
            assert_eq!(outcome, Outcome::Processed);
            completed.push(path);
        }
    }
    assert_eq!(completed, enqueue_order);

    let counts = h.store.counts().await.unwrap();
    assert_eq!(counts.files, 5);
    assert_eq!(counts.analyzed, 5);
}

#[tokio::test]
async fn rescan_after_processing_enqueues_nothing() {
    let mut h = harness().await;
    for i in 1..=3 {
        h.write(&format!("doc-{}.pdf", i), format!("content {}", i).as_bytes());
    }

    assert_eq!(h.scan_and_enqueue().await, 3);
    h.happy_pipeline().run(&h.queue).await;

    assert_eq!(h.scan_and_enqueue().await, 0);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn rescan_with_partial_progress_enqueues_no_duplicates() {
    let mut h = harness().await;
    for i in 1..=5 {
        h.write(&format!("doc-{}.pdf", i), format!("content {}", i).as_bytes());
    }
    assert_eq!(h.scan_and_enqueue().await, 5);

    // Process only the first 3, leaving 2 pending
    let pipeline = h.happy_pipeline();
    for item in h.queue.snapshot().into_iter().take(3) {
        h.queue.remove(&item.path);
        let mut entry = None;
        for f in h.watcher.known_files() {
            if f.path == item.path {
                entry = Some(f);
            }
        }
        let entry = entry.unwrap();
        let solo = Arc::new(WorkQueue::new(h.bus.clone()));
        solo.add(&entry);
        let stats = pipeline.run(&solo).await;
        assert_eq!(stats.processed, 1);
    }

    // 3 analyzed, 2 still pending in the original queue: nothing new
    assert_eq!(h.scan_and_enqueue().await, 0);
    assert_eq!(h.queue.len(), 2);
}

#[tokio::test]
async fn duplicate_content_is_analyzed_once() {
    let mut h = harness().await;
    h.write("original.pdf", b"identical bytes");
    h.write("copy of original.pdf", b"identical bytes");

    // Neither is analyzed yet, so both paths are queued
    assert_eq!(h.scan_and_enqueue().await, 2);

    let stats = h.happy_pipeline().run(&h.queue).await;

    // First item persists the content; the second is found analyzed at
    // claim time and is skipped, not an error.
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(h.store.counts().await.unwrap().files, 1);

    // A later scan enqueues neither path
    assert_eq!(h.scan_and_enqueue().await, 0);
}

#[tokio::test]
async fn provisioning_failure_fails_every_item_without_hanging() {
    let mut h = harness().await;
    for i in 1..=4 {
        h.write(&format!("doc-{}.pdf", i), format!("content {}", i).as_bytes());
    }
    assert_eq!(h.scan_and_enqueue().await, 4);

    let (classifier, provisioned) = FakeClassifier::unprovisioned();
    let pipeline = h.pipeline(
        Arc::new(FakeOcr { fail_for: None }),
        Arc::new(classifier),
        Arc::new(FakeProvisioner {
            succeeds: false,
            provisioned,
            fetches: AtomicUsize::new(0),
        }),
    );

    let stats = tokio::time::timeout(Duration::from_secs(10), pipeline.run(&h.queue))
        .await
        .expect("run must not hang");

    assert_eq!(stats.processed, 0);
    assert_eq!(stats.failed, 4);
    assert_eq!(stats.skipped, 0);
    assert_eq!(h.store.counts().await.unwrap().files, 0);
}

#[tokio::test]
async fn missing_model_is_pulled_once_and_retried() {
    let mut h = harness().await;
    h.write("doc.pdf", b"content");
    assert_eq!(h.scan_and_enqueue().await, 1);

    let (classifier, provisioned) = FakeClassifier::unprovisioned();
    let provisioner = Arc::new(FakeProvisioner {
        succeeds: true,
        provisioned,
        fetches: AtomicUsize::new(0),
    });
    let pipeline = h.pipeline(
        Arc::new(FakeOcr { fail_for: None }),
        Arc::new(classifier),
        provisioner.clone(),
    );

    let mut rx = h.bus.subscribe();
    let stats = pipeline.run(&h.queue).await;

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(provisioner.fetches.load(Ordering::SeqCst), 1);
    let fingerprint = scandex::hash::fingerprint_file(&h.inbox.join("doc.pdf")).unwrap();
    assert!(h.store.is_analyzed(&fingerprint).await.unwrap());

    // The completion event carries the auto-provisioned flag
    let mut saw_completion = false;
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::ItemCompleted {
            outcome,
            auto_provisioned,
            ..
        } = event
        {
            assert_eq!(outcome, Outcome::Processed);
            assert!(auto_provisioned);
            saw_completion = true;
        }
    }
    assert!(saw_completion);
}

#[tokio::test]
async fn one_bad_item_does_not_abort_the_batch() {
    let mut h = harness().await;
    h.write("good-1.pdf", b"alpha");
    h.write("broken.pdf", b"beta");
    h.write("good-2.pdf", b"gamma");
    assert_eq!(h.scan_and_enqueue().await, 3);

    let pipeline = h.pipeline(
        Arc::new(FakeOcr {
            fail_for: Some("broken.pdf".to_string()),
        }),
        Arc::new(FakeClassifier::ready()),
        Arc::new(FakeProvisioner::noop()),
    );

    let stats = pipeline.run(&h.queue).await;
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 1);

    // The failed item stays in the queue with its reason, blocking silent
    // reprocessing until someone removes it.
    let remaining = h.queue.snapshot();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].state, ItemState::Failed);
    assert!(remaining[0]
        .reason
        .as_deref()
        .unwrap()
        .contains("scripted OCR failure"));

    // Rescan does not re-enqueue the failed path
    assert_eq!(h.scan_and_enqueue().await, 0);
}

#[tokio::test]
async fn cancellation_fails_in_flight_item_and_leaves_rest_pending() {
    let mut h = harness().await;
    h.write("doc-1.pdf", b"alpha");
    h.write("doc-2.pdf", b"beta");
    h.write("doc-3.pdf", b"gamma");
    assert_eq!(h.scan_and_enqueue().await, 3);

    let pipeline = h.pipeline(
        Arc::new(FakeOcr { fail_for: None }),
        Arc::new(StuckClassifier),
        Arc::new(FakeProvisioner::noop()),
    );

    let cancel = pipeline.cancel_flag();
    let queue = h.queue.clone();
    let run = tokio::spawn(async move { pipeline.run(&queue).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("cancelled run must return promptly")
        .unwrap();

    assert_eq!(stats.processed, 0);
    assert_eq!(stats.failed, 1);

    let snapshot = h.queue.snapshot();
    let failed: Vec<_> = snapshot
        .iter()
        .filter(|i| i.state == ItemState::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason.as_deref(), Some("cancelled"));
    assert_eq!(
        snapshot
            .iter()
            .filter(|i| i.state == ItemState::Pending)
            .count(),
        2
    );
}

#[tokio::test]
async fn reprocessing_replaces_results_instead_of_appending() {
    let mut h = harness().await;
    let path = h.write("doc.pdf", b"version one");
    assert_eq!(h.scan_and_enqueue().await, 1);
    h.happy_pipeline().run(&h.queue).await;
    assert_eq!(h.store.counts().await.unwrap().files, 1);

    // Content changes, so the fingerprint changes and the file is re-queued
    std::fs::write(&path, b"version two with more bytes").unwrap();
    assert_eq!(h.scan_and_enqueue().await, 1);
    h.happy_pipeline().run(&h.queue).await;

    // New content means a second identity; each has exactly one page
    let counts = h.store.counts().await.unwrap();
    assert_eq!(counts.files, 2);
    assert_eq!(counts.pages, 2);
}

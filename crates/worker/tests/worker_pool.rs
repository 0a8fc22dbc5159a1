//! End-to-end behaviour of the queue and worker pool over the in-memory store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use urbanwatch_classifier::{Classifier, ClassifierError, GuardedClassifier};
use urbanwatch_core::category::IssueCategory;
use urbanwatch_core::classification::{Classification, ClassificationSource};
use urbanwatch_core::geo::GeoPoint;
use urbanwatch_core::issue::{Issue, NewIssue};
use urbanwatch_core::observation::{NewObservation, Observation};
use urbanwatch_core::status::IssueStatus;
use urbanwatch_core::types::IssueId;
use urbanwatch_db::{IssueStore, MemoryIssueStore, StoreError};
use urbanwatch_events::bus::OBSERVATION_FAILED;
use urbanwatch_events::EventBus;
use urbanwatch_pipeline::{GeoIndex, IssueGateway, PipelineConfig};
use urbanwatch_worker::{
    DeadLetters, IngestQueue, Processor, ProgressTracker, QueueError, RetryPolicy, WorkerPool,
};

// ---------------------------------------------------------------------------
// Doubles
// ---------------------------------------------------------------------------

struct FixedClassifier(Classification);

#[async_trait]
impl Classifier for FixedClassifier {
    async fn classify(&self, _: &Observation) -> Result<Classification, ClassifierError> {
        Ok(self.0.clone())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

struct DownClassifier;

#[async_trait]
impl Classifier for DownClassifier {
    async fn classify(&self, _: &Observation) -> Result<Classification, ClassifierError> {
        Err(ClassifierError::Unavailable("connection refused".into()))
    }

    fn name(&self) -> &'static str {
        "down"
    }
}

/// Fails the next `failures` writes with `Unavailable`, then delegates.
struct FlakyStore {
    inner: MemoryIssueStore,
    failures: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: MemoryIssueStore::new(),
            failures: AtomicU32::new(failures),
        }
    }

    fn trip(&self) -> Result<(), StoreError> {
        let tripped = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl IssueStore for FlakyStore {
    async fn get(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        self.inner.get(id).await
    }

    async fn insert(&self, issue: NewIssue) -> Result<Issue, StoreError> {
        self.trip()?;
        self.inner.insert(issue).await
    }

    async fn compare_and_swap(&self, issue: &Issue) -> Result<Issue, StoreError> {
        self.trip()?;
        self.inner.compare_and_swap(issue).await
    }

    async fn delete(&self, id: IssueId) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    async fn list_all(&self) -> Result<Vec<Issue>, StoreError> {
        self.inner.list_all().await
    }

    async fn list_open(&self) -> Result<Vec<Issue>, StoreError> {
        self.inner.list_open().await
    }

    async fn list_by_status(&self, status: IssueStatus) -> Result<Vec<Issue>, StoreError> {
        self.inner.list_by_status(status).await
    }

    async fn list_by_reporter(&self, reporter_id: &str) -> Result<Vec<Issue>, StoreError> {
        self.inner.list_by_reporter(reporter_id).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    queue: IngestQueue,
    pool: WorkerPool,
    store: Arc<dyn IssueStore>,
    events: Arc<EventBus>,
    progress: Arc<ProgressTracker>,
    dead_letters: Arc<DeadLetters>,
}

fn harness(store: Arc<dyn IssueStore>, classifier: Arc<dyn Classifier>, workers: usize) -> Harness {
    let events = Arc::new(EventBus::default());
    let gateway = Arc::new(IssueGateway::new(
        store.clone(),
        Arc::new(GeoIndex::new()),
        events.clone(),
        PipelineConfig::default(),
    ));
    let progress = Arc::new(ProgressTracker::new());
    let dead_letters = Arc::new(DeadLetters::new());
    let retry = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        ..RetryPolicy::default()
    };
    let processor = Arc::new(Processor::new(
        gateway,
        GuardedClassifier::new(classifier, Duration::from_millis(100), 1),
        retry,
        progress.clone(),
        dead_letters.clone(),
        CancellationToken::new(),
    ));
    let (queue, receiver) = IngestQueue::bounded(64, progress.clone());
    let pool = WorkerPool::start(queue.clone(), receiver, processor, workers);

    Harness {
        queue,
        pool,
        store,
        events,
        progress,
        dead_letters,
    }
}

fn origin() -> GeoPoint {
    GeoPoint::new(22.3149, 87.3105)
}

fn submission(reporter: &str, location: GeoPoint, hint: Option<IssueCategory>) -> NewObservation {
    NewObservation {
        reporter_id: reporter.into(),
        category_hint: hint,
        image_ref: format!("uploads/{reporter}.jpg"),
        location,
        address: Some("Main Road".into()),
        submitted_at: None,
    }
}

fn pothole_model() -> Arc<dyn Classifier> {
    Arc::new(FixedClassifier(
        Classification::from_model(IssueCategory::Potholes, 0.92, 60.0).unwrap(),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_potholes_ten_metres_apart_merge() {
    let h = harness(Arc::new(MemoryIssueStore::new()), pothole_model(), 1);
    h.queue.enqueue(submission("alice", origin(), None)).unwrap();
    h.queue
        .enqueue(submission("bob", origin().offset_north(10.0), None))
        .unwrap();
    h.pool.shutdown().await;

    let issues = h.store.list_all().await.unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].confirmation_count(), 2);
    assert_eq!(issues[0].category, IssueCategory::Potholes);

    let counts = h.progress.counts();
    assert_eq!(counts.created, 1);
    assert_eq!(counts.merged, 1);
    assert_eq!(h.progress.in_flight(), 0);
}

#[tokio::test]
async fn same_reporter_twice_counts_once() {
    let h = harness(Arc::new(MemoryIssueStore::new()), pothole_model(), 1);
    h.queue.enqueue(submission("alice", origin(), None)).unwrap();
    h.queue
        .enqueue(submission("alice", origin().offset_north(5.0), None))
        .unwrap();
    h.pool.shutdown().await;

    let issues = h.store.list_all().await.unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].confirmation_count(), 1);
    assert_eq!(h.progress.counts().already_confirmed, 1);
}

#[tokio::test(start_paused = true)]
async fn classifier_down_without_hint_uses_default() {
    let h = harness(Arc::new(MemoryIssueStore::new()), Arc::new(DownClassifier), 1);
    h.queue.enqueue(submission("alice", origin(), None)).unwrap();
    h.queue
        .enqueue(submission("bob", origin().offset_east(8.0), None))
        .unwrap();
    h.pool.shutdown().await;

    let issues = h.store.list_all().await.unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].category, IssueCategory::default());
    assert_eq!(issues[0].confirmation_count(), 2);
    assert!(h.dead_letters.is_empty());
}

#[tokio::test(start_paused = true)]
async fn classifier_down_uses_reporter_hint() {
    let h = harness(Arc::new(MemoryIssueStore::new()), Arc::new(DownClassifier), 1);
    h.queue
        .enqueue(submission("alice", origin(), Some(IssueCategory::TrashOverflow)))
        .unwrap();
    h.pool.shutdown().await;

    let issues = h.store.list_all().await.unwrap();
    assert_eq!(issues[0].category, IssueCategory::TrashOverflow);
    assert_eq!(
        Classification::fallback(Some(IssueCategory::TrashOverflow)).source,
        ClassificationSource::ReporterHint
    );
}

#[tokio::test(start_paused = true)]
async fn transient_store_failures_are_retried() {
    let store = Arc::new(FlakyStore::new(2));
    let h = harness(store, pothole_model(), 1);
    h.queue.enqueue(submission("alice", origin(), None)).unwrap();
    h.pool.shutdown().await;

    assert_eq!(h.store.list_all().await.unwrap().len(), 1);
    assert_eq!(h.progress.counts().created, 1);
    assert!(h.dead_letters.is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_mark_failed() {
    let store = Arc::new(FlakyStore::new(u32::MAX));
    let h = harness(store, pothole_model(), 2);
    let mut events = h.events.subscribe();

    let id = h.queue.enqueue(submission("alice", origin(), None)).unwrap();
    h.queue
        .enqueue(submission("bob", origin().offset_north(900.0), None))
        .unwrap();
    h.pool.shutdown().await;

    assert!(h.store.list_all().await.unwrap().is_empty());
    assert_eq!(h.progress.counts().failed, 2);
    assert_eq!(h.progress.in_flight(), 0);

    let failed = h.dead_letters.list();
    assert_eq!(failed.len(), 2);
    let alice = failed.iter().find(|f| f.observation.id == id).unwrap();
    assert_eq!(alice.attempts, 3);
    assert!(alice.reason.contains("connection reset"));

    let event = events.recv().await.unwrap();
    assert_eq!(event.event_type, OBSERVATION_FAILED);
}

#[tokio::test]
async fn shutdown_drains_every_queued_observation() {
    let h = harness(Arc::new(MemoryIssueStore::new()), pothole_model(), 4);
    for i in 0..20 {
        h.queue
            .enqueue(submission(&format!("r{i}"), origin().offset_north(i as f64 * 300.0), None))
            .unwrap();
    }
    h.pool.shutdown().await;

    let counts = h.progress.counts();
    assert_eq!(counts.enqueued, 20);
    assert_eq!(counts.created, 20);
    assert_eq!(counts.completed(), 20);
    assert_matches!(
        h.queue.enqueue(submission("late", origin(), None)),
        Err(QueueError::Closed)
    );
}

#[tokio::test]
async fn abort_fails_queued_observations_instead_of_dropping() {
    let h = harness(Arc::new(MemoryIssueStore::new()), pothole_model(), 1);
    for i in 0..3 {
        h.queue
            .enqueue(submission(&format!("r{i}"), origin(), None))
            .unwrap();
    }
    // Workers have not been polled yet on this runtime.
    h.pool.abort().await;

    let counts = h.progress.counts();
    assert_eq!(counts.failed, 3);
    assert_eq!(h.dead_letters.len(), 3);
    assert!(h.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_observation_never_reaches_workers() {
    let h = harness(Arc::new(MemoryIssueStore::new()), pothole_model(), 1);
    let err = h
        .queue
        .enqueue(submission("alice", GeoPoint::new(0.0, 181.0), None))
        .unwrap_err();
    assert_matches!(err, QueueError::Invalid(_));
    h.pool.shutdown().await;

    assert_eq!(h.progress.counts().enqueued, 0);
    assert!(h.dead_letters.is_empty());
}

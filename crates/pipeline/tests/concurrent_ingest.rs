//! Concurrency properties of the issue gateway against the in-memory store.

use std::sync::Arc;

use futures::future::join_all;
use urbanwatch_core::category::IssueCategory;
use urbanwatch_core::classification::Classification;
use urbanwatch_core::geo::GeoPoint;
use urbanwatch_core::observation::{NewObservation, Observation};
use urbanwatch_db::{IssueStore, MemoryIssueStore};
use urbanwatch_events::EventBus;
use urbanwatch_pipeline::{GeoIndex, IngestOutcome, IssueGateway, PipelineConfig};

fn origin() -> GeoPoint {
    GeoPoint::new(22.3149, 87.3105)
}

fn observation(reporter: &str, location: GeoPoint) -> Observation {
    Observation::accept(NewObservation {
        reporter_id: reporter.to_string(),
        category_hint: None,
        image_ref: format!("uploads/{reporter}.jpg"),
        location,
        address: None,
        submitted_at: None,
    })
    .unwrap()
}

fn pothole() -> Classification {
    Classification::from_model(IssueCategory::Potholes, 0.9, 55.0).unwrap()
}

fn gateway(store: Arc<MemoryIssueStore>) -> Arc<IssueGateway> {
    let config = PipelineConfig {
        // High enough that contention alone never exhausts the budget here.
        cas_retries: 256,
        ..PipelineConfig::default()
    };
    Arc::new(IssueGateway::new(
        store,
        Arc::new(GeoIndex::new()),
        Arc::new(EventBus::default()),
        config,
    ))
}

async fn ingest(gw: &IssueGateway, obs: Observation) -> IngestOutcome {
    let cls = pothole();
    let decision = gw.resolve(&obs, &cls).await.unwrap();
    gw.merge_or_create(decision, &obs, &cls).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn n_concurrent_merges_add_exactly_n() {
    const N: usize = 64;
    let store = Arc::new(MemoryIssueStore::new());
    let gw = gateway(store.clone());

    let seed = ingest(&gw, observation("seed", origin())).await;
    let id = seed.issue().id;

    let tasks = (0..N).map(|i| {
        let gw = gw.clone();
        tokio::spawn(async move {
            let at = origin().offset_north((i % 40) as f64);
            ingest(&gw, observation(&format!("reporter-{i}"), at)).await
        })
    });
    let outcomes = join_all(tasks).await;

    for outcome in outcomes {
        let outcome = outcome.unwrap();
        assert!(matches!(outcome, IngestOutcome::Merged(_)), "got {}", outcome.kind());
        assert_eq!(outcome.issue().id, id);
    }

    let issue = store.get(id).await.unwrap().unwrap();
    assert_eq!(issue.confirmation_count(), N + 1);
    assert_eq!(issue.evidence.len(), N + 1);
    assert_eq!(issue.version, N as i64 + 1);
    issue.check_invariants().unwrap();
    assert_eq!(store.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_first_reports_open_one_issue() {
    const N: usize = 32;
    let store = Arc::new(MemoryIssueStore::new());
    let gw = gateway(store.clone());

    let tasks = (0..N).map(|i| {
        let gw = gw.clone();
        tokio::spawn(async move {
            // Scattered within 20 m so every pair is inside the merge radius.
            let at = origin().offset_north((i % 5) as f64 * 4.0).offset_east((i % 3) as f64 * 4.0);
            ingest(&gw, observation(&format!("reporter-{i}"), at)).await
        })
    });
    let outcomes: Vec<IngestOutcome> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let created = outcomes
        .iter()
        .filter(|o| matches!(o, IngestOutcome::Created(_)))
        .count();
    assert_eq!(created, 1);

    let all = store.list_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].confirmation_count(), N);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_reporter_racing_itself_counts_once() {
    let store = Arc::new(MemoryIssueStore::new());
    let gw = gateway(store.clone());
    let seed = ingest(&gw, observation("seed", origin())).await;

    let tasks = (0..16).map(|_| {
        let gw = gw.clone();
        tokio::spawn(async move { ingest(&gw, observation("bob", origin().offset_east(3.0))).await })
    });
    join_all(tasks).await;

    let issue = store.get(seed.issue().id).await.unwrap().unwrap();
    assert_eq!(issue.confirmation_count(), 2);
    assert_eq!(store.len().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_issues_do_not_interfere() {
    let store = Arc::new(MemoryIssueStore::new());
    let gw = gateway(store.clone());

    let tasks = (0..20).map(|i| {
        let gw = gw.clone();
        tokio::spawn(async move {
            let at = origin().offset_east(i as f64 * 200.0);
            ingest(&gw, observation(&format!("r{i}"), at)).await
        })
    });
    let outcomes = join_all(tasks).await;
    assert!(outcomes
        .into_iter()
        .all(|o| matches!(o.unwrap(), IngestOutcome::Created(_))));
    assert_eq!(store.len().await, 20);
}

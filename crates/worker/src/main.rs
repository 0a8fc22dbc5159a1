use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use urbanwatch_classifier::{Classifier, FallbackClassifier, GuardedClassifier, HttpClassifier};
use urbanwatch_core::observation::NewObservation;
use urbanwatch_db::{IssueStore, MemoryIssueStore, PgIssueStore};
use urbanwatch_events::EventBus;
use urbanwatch_pipeline::{GeoIndex, IssueGateway, IssueService};
use urbanwatch_worker::{
    ClassifierMode, DeadLetters, IngestQueue, Processor, ProgressTracker, QueueError,
    WorkerConfig, WorkerPool,
};

/// Pause between enqueue attempts while the queue is full.
const BACKPRESSURE_DELAY: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "urbanwatch_worker=debug,urbanwatch_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        concurrency = config.concurrency,
        queue_capacity = config.queue_capacity,
        radius_meters = config.pipeline.radius_meters,
        "Worker starting",
    );

    // --- Store ---
    let store: Arc<dyn IssueStore> = match &config.database_url {
        Some(url) => {
            let pool = urbanwatch_db::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            urbanwatch_db::health_check(&pool)
                .await
                .context("Database health check failed")?;
            urbanwatch_db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Using Postgres issue store");
            Arc::new(PgIssueStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, issues are kept in memory only");
            Arc::new(MemoryIssueStore::new())
        }
    };

    // --- Classifier ---
    let inner: Arc<dyn Classifier> = match &config.classifier.mode {
        ClassifierMode::Http { url } => Arc::new(
            HttpClassifier::new(url.clone(), config.classifier.timeout)
                .context("Failed to build classifier client")?,
        ),
        ClassifierMode::Fallback => Arc::new(FallbackClassifier),
    };
    let classifier = GuardedClassifier::new(inner, config.classifier.timeout, config.classifier.attempts);
    tracing::info!(classifier = classifier.inner_name(), "Classifier ready");

    // --- Pipeline ---
    let events = Arc::new(EventBus::default());
    let index = Arc::new(GeoIndex::new());
    let service = Arc::new(IssueService::new(store.clone(), index.clone()));
    let gateway = Arc::new(
        IssueGateway::new(store, index, events.clone(), config.pipeline)
            .with_invalidator(service.clone()),
    );
    gateway.rebuild_index().await.context("Failed to load open issues")?;

    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => tracing::debug!(
                    event_type = %event.event_type,
                    issue_id = ?event.issue_id,
                    observation_id = ?event.observation_id,
                    "Event published",
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // --- Workers ---
    let progress = Arc::new(ProgressTracker::new());
    let dead_letters = Arc::new(DeadLetters::new());
    let cancel = CancellationToken::new();
    let (queue, receiver) = IngestQueue::bounded(config.queue_capacity, progress.clone());
    let processor = Arc::new(Processor::new(
        gateway,
        classifier,
        config.retry.clone(),
        progress.clone(),
        dead_letters.clone(),
        cancel.clone(),
    ));
    let pool = WorkerPool::start(queue.clone(), receiver, processor, config.concurrency);

    // --- Input ---
    let interrupted = tokio::select! {
        result = read_observations(&queue) => {
            result.context("Failed to read observations from stdin")?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        tracing::info!("Interrupted, draining queued observations");
    } else {
        tracing::info!("Input exhausted, draining queued observations");
    }
    pool.shutdown().await;

    // --- Report ---
    let counts = progress.counts();
    tracing::info!(
        enqueued = counts.enqueued,
        created = counts.created,
        merged = counts.merged,
        already_confirmed = counts.already_confirmed,
        failed = counts.failed,
        "Ingestion finished",
    );
    match service.summary().await {
        Ok(summary) => tracing::info!(
            summary = %serde_json::to_string(&summary).unwrap_or_default(),
            "Issue summary",
        ),
        Err(e) => tracing::error!(error = %e, "Failed to compute issue summary"),
    }
    for failed in dead_letters.list() {
        tracing::warn!(
            observation_id = %failed.observation.id,
            reporter_id = %failed.observation.reporter_id,
            attempts = failed.attempts,
            reason = %failed.reason,
            "Failed observation",
        );
    }

    Ok(())
}

/// Enqueue one observation per stdin line until EOF. Malformed lines are
/// logged and skipped.
async fn read_observations(queue: &IngestQueue) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let submission: NewObservation = match serde_json::from_str(&line) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping malformed observation");
                continue;
            }
        };

        loop {
            match queue.enqueue(submission.clone()) {
                Ok(_) => break,
                Err(QueueError::Full) => tokio::time::sleep(BACKPRESSURE_DELAY).await,
                Err(e) => {
                    tracing::warn!(line = line_no, error = %e, "Observation rejected");
                    break;
                }
            }
        }
    }
    Ok(())
}

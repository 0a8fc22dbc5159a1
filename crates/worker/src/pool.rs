//! Worker pool driving queued observations to a terminal state.
//!
//! Each worker takes one observation at a time from the shared receiver and
//! runs it through classify, resolve and persist. Resolve and persist are
//! retried together with exponential backoff while the error is transient;
//! classification happens once since [`GuardedClassifier`] never fails.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use urbanwatch_classifier::GuardedClassifier;
use urbanwatch_core::classification::Classification;
use urbanwatch_core::error::CoreError;
use urbanwatch_core::observation::Observation;
use urbanwatch_events::bus::OBSERVATION_FAILED;
use urbanwatch_events::IssueEvent;
use urbanwatch_pipeline::{IngestOutcome, IssueGateway, PipelineError};

use crate::failed::{DeadLetters, FailedObservation};
use crate::progress::{ObservationState, ProgressTracker};
use crate::queue::IngestQueue;
use crate::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Invalid observation: {0}")]
    Invalid(#[from] CoreError),

    #[error("Shut down before the observation completed")]
    Cancelled,
}

impl ProcessError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Pipeline(e) => e.is_retryable(),
            Self::Invalid(_) | Self::Cancelled => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Runs a single observation through the pipeline.
pub struct Processor {
    gateway: Arc<IssueGateway>,
    classifier: GuardedClassifier,
    retry: RetryPolicy,
    progress: Arc<ProgressTracker>,
    dead_letters: Arc<DeadLetters>,
    cancel: CancellationToken,
}

impl Processor {
    pub fn new(
        gateway: Arc<IssueGateway>,
        classifier: GuardedClassifier,
        retry: RetryPolicy,
        progress: Arc<ProgressTracker>,
        dead_letters: Arc<DeadLetters>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            classifier,
            retry,
            progress,
            dead_letters,
            cancel,
        }
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetters> {
        &self.dead_letters
    }

    /// Drive `observation` to `Done` or `Failed`. A failure is recorded,
    /// never propagated.
    pub async fn process(&self, observation: Observation) -> Option<IngestOutcome> {
        let span = tracing::info_span!(
            "observation",
            observation_id = %observation.id,
            reporter_id = %observation.reporter_id,
        );
        self.run(observation).instrument(span).await
    }

    async fn run(&self, observation: Observation) -> Option<IngestOutcome> {
        let id = observation.id;

        if let Err(e) = observation.location.validate() {
            self.fail(observation, ProcessError::Invalid(e), 0);
            return None;
        }

        self.progress.transition(id, ObservationState::Classifying);
        let classification = self.classifier.classify(&observation).await;
        tracing::debug!(
            category = %classification.category,
            confidence = classification.confidence,
            source = classification.source.as_str(),
            "Classified observation",
        );

        loop {
            let attempt = self.progress.attempt(id);
            let error = match self.attempt(&observation, &classification).await {
                Ok(outcome) => {
                    self.progress.transition(
                        id,
                        ObservationState::Done {
                            issue_id: outcome.issue().id,
                            outcome: outcome.kind(),
                        },
                    );
                    return Some(outcome);
                }
                Err(e) => e,
            };

            if !error.is_retryable() || !self.retry.has_attempts_left(attempt) {
                self.fail(observation, error, attempt);
                return None;
            }

            let delay = self.retry.delay_after(attempt);
            tracing::warn!(
                attempt,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Processing failed, retrying",
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    self.fail(observation, error, attempt);
                    return None;
                }
            }
        }
    }

    async fn attempt(
        &self,
        observation: &Observation,
        classification: &Classification,
    ) -> Result<IngestOutcome, ProcessError> {
        self.progress.transition(observation.id, ObservationState::Resolving);
        let decision = self.gateway.resolve(observation, classification).await?;

        self.progress.transition(observation.id, ObservationState::Persisting);
        let outcome = self
            .gateway
            .merge_or_create(decision, observation, classification)
            .await?;
        Ok(outcome)
    }

    /// Record `observation` as failed with `error` as the reason.
    pub fn fail(&self, observation: Observation, error: ProcessError, attempts: u32) {
        let reason = error.to_string();
        self.progress.transition(
            observation.id,
            ObservationState::Failed {
                reason: reason.clone(),
            },
        );
        self.gateway.events().publish(
            IssueEvent::new(OBSERVATION_FAILED)
                .with_observation(observation.id, observation.reporter_id.clone())
                .with_payload(serde_json::json!({
                    "reason": reason,
                    "attempts": attempts,
                })),
        );
        self.dead_letters.record(FailedObservation {
            observation,
            reason,
            attempts,
            failed_at: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Fixed-size set of workers sharing one receiver.
pub struct WorkerPool {
    queue: IngestQueue,
    processor: Arc<Processor>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `concurrency` workers reading from `receiver`. Cancelling the
    /// processor's token stops them the same way [`abort`](Self::abort) does.
    pub fn start(
        queue: IngestQueue,
        receiver: mpsc::Receiver<Observation>,
        processor: Arc<Processor>,
        concurrency: usize,
    ) -> Self {
        let cancel = processor.cancel.clone();
        let receiver = Arc::new(Mutex::new(receiver));
        let handles = (0..concurrency.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    receiver.clone(),
                    processor.clone(),
                    cancel.clone(),
                ))
            })
            .collect::<Vec<_>>();

        tracing::info!(workers = handles.len(), "Worker pool started");
        Self {
            queue,
            processor,
            cancel,
            handles,
        }
    }

    pub fn queue(&self) -> &IngestQueue {
        &self.queue
    }

    pub fn processor(&self) -> &Arc<Processor> {
        &self.processor
    }

    /// Close the queue and wait until every queued observation is terminal.
    pub async fn shutdown(self) {
        self.queue.close();
        self.join().await;
    }

    /// Stop workers after their current step. Observations still queued are
    /// marked failed instead of processed.
    pub async fn abort(self) {
        self.queue.close();
        self.cancel.cancel();
        self.join().await;
    }

    async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Observation>>>,
    processor: Arc<Processor>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker, "Worker started");
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                observation = rx.recv() => observation,
            }
        };
        let Some(observation) = next else {
            break;
        };
        processor.process(observation).await;
    }

    if cancel.is_cancelled() {
        let mut rx = receiver.lock().await;
        while let Ok(observation) = rx.try_recv() {
            processor.fail(observation, ProcessError::Cancelled, 0);
        }
    }
    tracing::debug!(worker, "Worker stopped");
}

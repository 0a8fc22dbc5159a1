//! Bounded ingestion queue between producers and the worker pool.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use urbanwatch_core::error::CoreError;
use urbanwatch_core::observation::{NewObservation, Observation};
use urbanwatch_core::types::ObservationId;

use crate::progress::ProgressTracker;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Invalid observation: {0}")]
    Invalid(#[from] CoreError),

    #[error("Ingestion queue is full")]
    Full,

    #[error("Ingestion queue is closed")]
    Closed,
}

impl QueueError {
    /// `Full` clears once workers catch up; the rest never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Producer handle. Cloning shares the same queue.
#[derive(Clone)]
pub struct IngestQueue {
    sender: Arc<Mutex<Option<mpsc::Sender<Observation>>>>,
    progress: Arc<ProgressTracker>,
}

impl IngestQueue {
    /// Create a queue holding at most `capacity` observations, returning the
    /// producer handle and the receiving end for the worker pool.
    pub fn bounded(
        capacity: usize,
        progress: Arc<ProgressTracker>,
    ) -> (Self, mpsc::Receiver<Observation>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            sender: Arc::new(Mutex::new(Some(tx))),
            progress,
        };
        (queue, rx)
    }

    fn sender(&self) -> Option<mpsc::Sender<Observation>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and queue a submission. Never blocks and never classifies.
    pub fn enqueue(&self, input: NewObservation) -> Result<ObservationId, QueueError> {
        let observation = Observation::accept(input)?;
        self.push(observation)
    }

    /// Queue an already accepted observation.
    pub fn push(&self, observation: Observation) -> Result<ObservationId, QueueError> {
        let sender = self.sender().ok_or(QueueError::Closed)?;
        let id = observation.id;

        self.progress.enqueued(id);
        match sender.try_send(observation) {
            Ok(()) => {
                tracing::debug!(observation_id = %id, "Observation enqueued");
                Ok(id)
            }
            Err(e) => {
                self.progress.rejected(id);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => QueueError::Full,
                    mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
                })
            }
        }
    }

    /// Stop accepting observations. Queued ones are still delivered.
    pub fn close(&self) {
        let dropped = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if dropped.is_some() {
            tracing::info!("Ingestion queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender().map_or(true, |s| s.is_closed())
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }
}

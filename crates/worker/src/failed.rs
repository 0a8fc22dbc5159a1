//! Observations that reached `Failed`, kept for manual inspection.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use urbanwatch_core::observation::Observation;
use urbanwatch_core::types::Timestamp;

#[derive(Debug, Clone, Serialize)]
pub struct FailedObservation {
    pub observation: Observation,
    /// Last error seen.
    pub reason: String,
    pub attempts: u32,
    pub failed_at: Timestamp,
}

/// Append-only list of failed observations. Nothing here is re-enqueued
/// automatically.
#[derive(Default)]
pub struct DeadLetters {
    entries: Mutex<Vec<FailedObservation>>,
}

impl DeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, failed: FailedObservation) {
        tracing::error!(
            observation_id = %failed.observation.id,
            reporter_id = %failed.observation.reporter_id,
            attempts = failed.attempts,
            reason = %failed.reason,
            "Observation failed",
        );
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failed);
    }

    pub fn list(&self) -> Vec<FailedObservation> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

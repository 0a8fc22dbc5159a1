//! Per-observation state machine and the tracker that records it.
//!
//! ```text
//! Queued -> Classifying -> Resolving -> Persisting -> Done
//!                 \             \            \
//!                  `-------------`------------`--> Failed(reason)
//! ```
//!
//! `Resolving` and `Persisting` repeat once per retry. Terminal records
//! leave the in-flight table; their totals stay in [`ProgressCounts`].

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use urbanwatch_core::types::{IssueId, ObservationId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ObservationState {
    Queued,
    Classifying,
    Resolving,
    Persisting,
    Done { issue_id: IssueId, outcome: &'static str },
    Failed { reason: String },
}

impl ObservationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Classifying => "classifying",
            Self::Resolving => "resolving",
            Self::Persisting => "persisting",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ObservationProgress {
    pub state: ObservationState,
    pub attempts: u32,
    pub updated_at: Timestamp,
}

/// Totals by outcome since start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressCounts {
    pub enqueued: u64,
    pub created: u64,
    pub merged: u64,
    pub already_confirmed: u64,
    pub failed: u64,
}

impl ProgressCounts {
    pub fn completed(&self) -> u64 {
        self.created + self.merged + self.already_confirmed + self.failed
    }
}

#[derive(Default)]
struct TrackerState {
    in_flight: HashMap<ObservationId, ObservationProgress>,
    counts: ProgressCounts,
}

#[derive(Default)]
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueued(&self, id: ObservationId) {
        let mut state = self.lock();
        state.counts.enqueued += 1;
        state.in_flight.insert(
            id,
            ObservationProgress {
                state: ObservationState::Queued,
                attempts: 0,
                updated_at: Utc::now(),
            },
        );
    }

    /// Undo [`enqueued`](Self::enqueued) for a submission the queue refused.
    pub fn rejected(&self, id: ObservationId) {
        let mut state = self.lock();
        if state.in_flight.remove(&id).is_some() {
            state.counts.enqueued = state.counts.enqueued.saturating_sub(1);
        }
    }

    /// Record a new attempt starting.
    pub fn attempt(&self, id: ObservationId) -> u32 {
        let mut state = self.lock();
        let entry = state.in_flight.entry(id).or_insert_with(|| ObservationProgress {
            state: ObservationState::Queued,
            attempts: 0,
            updated_at: Utc::now(),
        });
        entry.attempts += 1;
        entry.updated_at = Utc::now();
        entry.attempts
    }

    /// Move an observation to `next`. Terminal states remove it from the
    /// in-flight table and bump the totals.
    pub fn transition(&self, id: ObservationId, next: ObservationState) {
        let mut state = self.lock();
        if next.is_terminal() {
            state.in_flight.remove(&id);
            match &next {
                ObservationState::Done { outcome: "created", .. } => state.counts.created += 1,
                ObservationState::Done { outcome: "merged", .. } => state.counts.merged += 1,
                ObservationState::Done { .. } => state.counts.already_confirmed += 1,
                _ => state.counts.failed += 1,
            }
        } else if let Some(entry) = state.in_flight.get_mut(&id) {
            entry.state = next;
            entry.updated_at = Utc::now();
        }
        tracing::trace!(observation_id = %id, "Observation state changed");
    }

    pub fn get(&self, id: ObservationId) -> Option<ObservationProgress> {
        self.lock().in_flight.get(&id).cloned()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn counts(&self) -> ProgressCounts {
        self.lock().counts.clone()
    }
}

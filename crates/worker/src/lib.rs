//! Ingestion queue and worker pool for Urban Watch observations.
//!
//! Producers call [`IngestQueue::enqueue`]; a [`WorkerPool`] of fixed size
//! classifies each observation and merges it into, or opens, an issue.

pub mod config;
pub mod failed;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod retry;

pub use config::{ClassifierConfig, ClassifierMode, ConfigError, WorkerConfig};
pub use failed::{DeadLetters, FailedObservation};
pub use pool::{ProcessError, Processor, WorkerPool};
pub use progress::{ObservationState, ProgressCounts, ProgressTracker};
pub use queue::{IngestQueue, QueueError};
pub use retry::RetryPolicy;

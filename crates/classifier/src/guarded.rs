//! Timeout, retry and fallback around any [`Classifier`].

use std::sync::Arc;
use std::time::Duration;

use urbanwatch_core::classification::Classification;
use urbanwatch_core::observation::Observation;

use crate::{Classifier, ClassifierError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_ATTEMPTS: u32 = 2;

/// Pause before the second attempt; doubles for each further attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on the pause between attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Run one classifier call, cancelling it if it outlives `timeout`.
pub async fn classify_with_timeout(
    classifier: &dyn Classifier,
    observation: &Observation,
    timeout: Duration,
) -> Result<Classification, ClassifierError> {
    match tokio::time::timeout(timeout, classifier.classify(observation)).await {
        Ok(result) => result,
        Err(_) => Err(ClassifierError::Timeout(timeout)),
    }
}

/// A classifier that always produces an answer.
///
/// Tries the inner classifier up to `attempts` times, each bounded by
/// `timeout`, with a doubling pause between attempts. When every attempt fails the observation gets
/// [`Classification::fallback`] built from its category hint.
pub struct GuardedClassifier {
    inner: Arc<dyn Classifier>,
    timeout: Duration,
    attempts: u32,
    retry_delay: Duration,
}

impl GuardedClassifier {
    pub fn new(inner: Arc<dyn Classifier>, timeout: Duration, attempts: u32) -> Self {
        Self {
            inner,
            timeout,
            attempts: attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the pause before the second attempt.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn next_delay(current: Duration) -> Duration {
        (current * 2).min(MAX_RETRY_DELAY)
    }

    pub fn inner_name(&self) -> &'static str {
        self.inner.name()
    }

    pub async fn classify(&self, observation: &Observation) -> Classification {
        let mut delay = self.retry_delay.min(MAX_RETRY_DELAY);
        for attempt in 1..=self.attempts {
            match classify_with_timeout(self.inner.as_ref(), observation, self.timeout).await {
                Ok(classification) => return classification,
                Err(e) => {
                    tracing::warn!(
                        observation_id = %observation.id,
                        classifier = self.inner.name(),
                        attempt,
                        max_attempts = self.attempts,
                        error = %e,
                        "Classifier call failed",
                    );
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(delay).await;
                delay = Self::next_delay(delay);
            }
        }

        let fallback = Classification::fallback(observation.category_hint);
        tracing::info!(
            observation_id = %observation.id,
            category = %fallback.category,
            source = fallback.source.as_str(),
            "Using fallback classification",
        );
        fallback
    }
}

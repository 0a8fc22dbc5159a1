//! Image classification behind a capability trait.
//!
//! [`HttpClassifier`] talks to the external model service,
//! [`FallbackClassifier`] answers without a model, and [`GuardedClassifier`]
//! wraps either with a timeout, a bounded number of attempts and a fallback
//! so that callers always get a [`Classification`] back.
//!
//! [`Classification`]: urbanwatch_core::classification::Classification

pub mod error;
pub mod fallback;
pub mod guarded;
pub mod http;

use async_trait::async_trait;
use urbanwatch_core::classification::Classification;
use urbanwatch_core::observation::Observation;

pub use error::ClassifierError;
pub use fallback::FallbackClassifier;
pub use guarded::{classify_with_timeout, GuardedClassifier};
pub use http::HttpClassifier;

/// Turns an observation's image into a category, confidence and severity hint.
///
/// Implementations have no side effects. Callers bound the wait; dropping
/// the returned future cancels the call.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, observation: &Observation) -> Result<Classification, ClassifierError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

use async_trait::async_trait;
use urbanwatch_core::classification::Classification;
use urbanwatch_core::observation::Observation;

use crate::{Classifier, ClassifierError};

/// Classifier used when no model is configured.
///
/// Answers with the reporter's category hint (or the default category) and
/// a mid-range severity hint. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackClassifier;

#[async_trait]
impl Classifier for FallbackClassifier {
    async fn classify(&self, observation: &Observation) -> Result<Classification, ClassifierError> {
        Ok(Classification::fallback(observation.category_hint))
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

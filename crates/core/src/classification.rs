//! Uniform classifier output and the fallback used when no model answers.

use serde::{Deserialize, Serialize};

use crate::category::IssueCategory;
use crate::error::CoreError;
use crate::observation::Observation;

/// Severity hint assumed when the model is unavailable (mid-range).
pub const FALLBACK_SEVERITY_HINT: f64 = 50.0;

/// Confidence assigned to a reporter-supplied category.
pub const REPORTER_HINT_CONFIDENCE: f64 = 0.5;

/// Default model confidence required before the model's category overrides
/// the reporter's hint for matching.
pub const DEFAULT_MIN_MERGE_CONFIDENCE: f64 = 0.3;

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// The external image model answered.
    Model,
    /// The model was unavailable; the reporter's category hint was used.
    ReporterHint,
    /// The model was unavailable and no hint was supplied.
    Default,
}

impl ClassificationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::ReporterHint => "reporter_hint",
            Self::Default => "default",
        }
    }
}

/// `{category, confidence in [0,1], severity_hint in [0,100]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: IssueCategory,
    pub confidence: f64,
    pub severity_hint: f64,
    pub source: ClassificationSource,
}

impl Classification {
    /// Build a model classification, rejecting out-of-contract values.
    pub fn from_model(
        category: IssueCategory,
        confidence: f64,
        severity_hint: f64,
    ) -> Result<Self, CoreError> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(CoreError::Validation(format!(
                "Classifier confidence {confidence} must be within [0, 1]"
            )));
        }
        if !severity_hint.is_finite() || !(0.0..=100.0).contains(&severity_hint) {
            return Err(CoreError::Validation(format!(
                "Classifier severity hint {severity_hint} must be within [0, 100]"
            )));
        }
        Ok(Self {
            category,
            confidence,
            severity_hint,
            source: ClassificationSource::Model,
        })
    }

    /// Classification used when the model cannot answer in time.
    ///
    /// Takes the reporter's hint when present, otherwise the default
    /// category, always with the mid-range severity hint.
    pub fn fallback(category_hint: Option<IssueCategory>) -> Self {
        match category_hint {
            Some(category) => Self {
                category,
                confidence: REPORTER_HINT_CONFIDENCE,
                severity_hint: FALLBACK_SEVERITY_HINT,
                source: ClassificationSource::ReporterHint,
            },
            None => Self {
                category: IssueCategory::default(),
                confidence: 0.0,
                severity_hint: FALLBACK_SEVERITY_HINT,
                source: ClassificationSource::Default,
            },
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source != ClassificationSource::Model
    }
}

/// Category an observation is matched (and, if new, filed) under.
///
/// A confident model answer wins. A weak model answer defers to the
/// reporter's hint when there is one. Otherwise the classification's own
/// category is used as-is.
pub fn matching_category(
    observation: &Observation,
    classification: &Classification,
    min_confidence: f64,
) -> IssueCategory {
    match classification.source {
        ClassificationSource::Model if classification.confidence >= min_confidence => {
            classification.category
        }
        _ => observation
            .category_hint
            .unwrap_or(classification.category),
    }
}

//! Raw report submissions before they are folded into an issue.
//!
//! An [`Observation`] only exists while it sits in the ingestion queue or is
//! being processed. Construction goes through [`Observation::accept`], which
//! validates the submission and stamps the id; nothing downstream has to
//! re-check coordinates or identifiers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::category::IssueCategory;
use crate::error::CoreError;
use crate::geo::GeoPoint;
use crate::types::{ObservationId, Timestamp};

/// Maximum length of a reporter identifier.
pub const MAX_REPORTER_ID_LEN: u64 = 128;

/// Maximum length of an image reference (URL or storage key).
pub const MAX_IMAGE_REF_LEN: u64 = 2048;

/// Maximum length of the free-text address.
pub const MAX_ADDRESS_LEN: u64 = 500;

/// A report as submitted by the API layer.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewObservation {
    #[validate(length(min = 1, max = MAX_REPORTER_ID_LEN))]
    pub reporter_id: String,
    /// Category the reporter picked, if any. Used when the classifier is down.
    #[serde(default)]
    pub category_hint: Option<IssueCategory>,
    #[validate(length(min = 1, max = MAX_IMAGE_REF_LEN))]
    pub image_ref: String,
    pub location: GeoPoint,
    #[serde(default)]
    #[validate(length(max = MAX_ADDRESS_LEN))]
    pub address: Option<String>,
    /// Client-side submission time. Defaults to the enqueue time.
    #[serde(default)]
    pub submitted_at: Option<Timestamp>,
}

/// A validated, queue-resident observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub reporter_id: String,
    pub category_hint: Option<IssueCategory>,
    pub image_ref: String,
    pub location: GeoPoint,
    pub address: Option<String>,
    pub submitted_at: Timestamp,
}

impl Observation {
    /// Validate a submission and assign it a fresh observation id.
    pub fn accept(input: NewObservation) -> Result<Self, CoreError> {
        validate_new_observation(&input)?;

        Ok(Self {
            id: uuid::Uuid::now_v7(),
            reporter_id: input.reporter_id.trim().to_string(),
            category_hint: input.category_hint,
            image_ref: input.image_ref,
            location: input.location,
            address: input.address,
            submitted_at: input.submitted_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Validate a submission without consuming it.
///
/// Rules:
/// - `reporter_id` is 1..=128 characters and not only whitespace.
/// - `image_ref` is 1..=2048 characters.
/// - `address`, when present, is at most 500 characters.
/// - `location` is finite and inside the WGS84 ranges.
pub fn validate_new_observation(input: &NewObservation) -> Result<(), CoreError> {
    input
        .validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;

    if input.reporter_id.trim().is_empty() {
        return Err(CoreError::Validation(
            "Reporter id must not be blank".to_string(),
        ));
    }

    input.location.validate()
}

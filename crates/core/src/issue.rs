//! The persisted issue aggregate and its pure mutations.
//!
//! Every mutation returns a new [`Issue`] value; the store decides whether
//! it commits (see the version check in the store gateway). Derived fields
//! (`people_reported`, `criticality`, `summary`) are recomputed from the
//! reporter set and the evidence list each time, never adjusted in place.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::category::IssueCategory;
use crate::classification::{Classification, ClassificationSource};
use crate::error::CoreError;
use crate::geo::GeoPoint;
use crate::observation::Observation;
use crate::scoring::criticality_score;
use crate::status::IssueStatus;
use crate::types::{IssueId, ObservationId, Timestamp};

/// Maximum length of admin notes, in characters.
pub const MAX_ADMIN_NOTES_LEN: usize = 1000;

/// One observation folded into an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub observation_id: ObservationId,
    pub reporter_id: String,
    pub image_ref: String,
    pub severity_hint: f64,
    pub confidence: f64,
    pub source: ClassificationSource,
    pub observed_at: Timestamp,
}

impl Evidence {
    pub fn new(observation: &Observation, classification: &Classification) -> Self {
        Self {
            observation_id: observation.id,
            reporter_id: observation.reporter_id.clone(),
            image_ref: observation.image_ref.clone(),
            severity_hint: classification.severity_hint,
            confidence: classification.confidence,
            source: classification.source,
            observed_at: observation.submitted_at,
        }
    }
}

/// An issue that has not been assigned an id by the store yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIssue {
    pub category: IssueCategory,
    pub location: GeoPoint,
    pub address: Option<String>,
    pub reporters: BTreeSet<String>,
    pub evidence: Vec<Evidence>,
    pub summary: String,
    pub criticality: i32,
    pub status: IssueStatus,
    pub created_at: Timestamp,
}

impl NewIssue {
    /// Open a new issue from its first observation.
    ///
    /// The observation's location becomes the issue centroid for the
    /// lifetime of the issue.
    pub fn from_observation(
        observation: &Observation,
        classification: &Classification,
        category: IssueCategory,
        now: Timestamp,
    ) -> Self {
        let reporters = BTreeSet::from([observation.reporter_id.clone()]);
        let evidence = vec![Evidence::new(observation, classification)];
        let criticality = criticality_score(category, reporters.len(), &hints(&evidence));

        Self {
            category,
            location: observation.location,
            address: observation.address.clone(),
            summary: describe(category, reporters.len(), criticality, observation.address.as_deref()),
            reporters,
            evidence,
            criticality,
            status: IssueStatus::WaitingForAttention,
            created_at: now,
        }
    }

    /// Attach the store-assigned id. New issues start at version 1.
    pub fn into_issue(self, id: IssueId) -> Issue {
        Issue {
            id,
            version: 1,
            category: self.category,
            location: self.location,
            address: self.address,
            reporters: self.reporters,
            evidence: self.evidence,
            summary: self.summary,
            criticality: self.criticality,
            status: self.status,
            admin_notes: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// A persisted physical problem, possibly confirmed by many reporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    /// Optimistic-concurrency counter. Incremented by the store on each commit.
    pub version: i64,
    pub category: IssueCategory,
    pub location: GeoPoint,
    pub address: Option<String>,
    pub reporters: BTreeSet<String>,
    pub evidence: Vec<Evidence>,
    pub summary: String,
    pub criticality: i32,
    pub status: IssueStatus,
    /// Free text left by whoever last changed the status.
    #[serde(default)]
    pub admin_notes: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Issue {
    /// Number of distinct reporters (`people_reported`).
    pub fn confirmation_count(&self) -> usize {
        self.reporters.len()
    }

    pub fn has_reporter(&self, reporter_id: &str) -> bool {
        self.reporters.contains(reporter_id)
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Severity hint history in evidence order.
    pub fn severity_hints(&self) -> Vec<f64> {
        hints(&self.evidence)
    }

    /// Image references in evidence order.
    pub fn image_refs(&self) -> Vec<&str> {
        self.evidence.iter().map(|e| e.image_ref.as_str()).collect()
    }

    /// Fold an observation from a new reporter into this issue.
    ///
    /// Returns `None` when the reporter has already confirmed the issue, in
    /// which case nothing changes. The returned issue keeps the current
    /// `version`; the store bumps it on commit.
    pub fn merge(
        &self,
        observation: &Observation,
        classification: &Classification,
        now: Timestamp,
    ) -> Option<Issue> {
        if self.has_reporter(&observation.reporter_id) {
            return None;
        }

        let mut next = self.clone();
        next.reporters.insert(observation.reporter_id.clone());
        next.evidence.push(Evidence::new(observation, classification));
        next.updated_at = now;
        next.refresh_derived();
        Some(next)
    }

    /// Move the issue forward in its lifecycle.
    pub fn with_status(&self, status: IssueStatus, now: Timestamp) -> Result<Issue, CoreError> {
        let status = self.status.transition_to(status)?;
        let mut next = self.clone();
        next.status = status;
        next.updated_at = now;
        Ok(next)
    }

    /// Replace the admin notes. `None` or blank text keeps the current notes.
    pub fn with_admin_notes(mut self, notes: Option<String>) -> Result<Issue, CoreError> {
        let Some(notes) = notes.filter(|n| !n.trim().is_empty()) else {
            return Ok(self);
        };
        validate_admin_notes(&notes)?;
        self.admin_notes = Some(notes);
        Ok(self)
    }

    /// Check the aggregate's internal consistency.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        let evidence_reporters: BTreeSet<&str> =
            self.evidence.iter().map(|e| e.reporter_id.as_str()).collect();
        if evidence_reporters.len() != self.evidence.len() {
            return Err(CoreError::Internal(format!(
                "Issue {} has more than one evidence entry per reporter",
                self.id
            )));
        }
        if self.reporters.iter().map(String::as_str).collect::<BTreeSet<_>>() != evidence_reporters
        {
            return Err(CoreError::Internal(format!(
                "Issue {} reporter set does not match its evidence",
                self.id
            )));
        }
        let expected = criticality_score(
            self.category,
            self.confirmation_count(),
            &self.severity_hints(),
        );
        if expected != self.criticality {
            return Err(CoreError::Internal(format!(
                "Issue {} criticality {} != recomputed {}",
                self.id, self.criticality, expected
            )));
        }
        Ok(())
    }

    fn refresh_derived(&mut self) {
        self.criticality = criticality_score(
            self.category,
            self.confirmation_count(),
            &self.severity_hints(),
        );
        self.summary = describe(
            self.category,
            self.confirmation_count(),
            self.criticality,
            self.address.as_deref(),
        );
    }
}

pub fn validate_admin_notes(notes: &str) -> Result<(), CoreError> {
    if notes.chars().count() > MAX_ADMIN_NOTES_LEN {
        return Err(CoreError::Validation(format!(
            "Admin notes must be at most {MAX_ADMIN_NOTES_LEN} characters"
        )));
    }
    Ok(())
}

fn hints(evidence: &[Evidence]) -> Vec<f64> {
    evidence.iter().map(|e| e.severity_hint).collect()
}

/// One-line textual summary of an issue.
pub fn describe(
    category: IssueCategory,
    confirmation_count: usize,
    criticality: i32,
    address: Option<&str>,
) -> String {
    let people = if confirmation_count == 1 {
        "1 person".to_string()
    } else {
        format!("{confirmation_count} people")
    };
    match address {
        Some(addr) if !addr.trim().is_empty() => format!(
            "{} reported by {people} near {} (criticality {criticality})",
            category.label(),
            addr.trim()
        ),
        _ => format!(
            "{} reported by {people} (criticality {criticality})",
            category.label()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::NewObservation;
    use chrono::Utc;

    fn observation(reporter: &str, lat: f64) -> Observation {
        Observation::accept(NewObservation {
            reporter_id: reporter.to_string(),
            category_hint: None,
            image_ref: format!("{reporter}.jpg"),
            location: GeoPoint::new(lat, 87.31),
            address: Some("Main Gate".to_string()),
            submitted_at: None,
        })
        .unwrap()
    }

    fn model(severity: f64) -> Classification {
        Classification::from_model(IssueCategory::Potholes, 0.9, severity).unwrap()
    }

    fn opened() -> Issue {
        NewIssue::from_observation(
            &observation("alice", 22.31),
            &model(60.0),
            IssueCategory::Potholes,
            Utc::now(),
        )
        .into_issue(7)
    }

    #[test]
    fn new_issue_starts_with_one_reporter() {
        let issue = opened();
        assert_eq!(issue.id, 7);
        assert_eq!(issue.version, 1);
        assert_eq!(issue.confirmation_count(), 1);
        assert_eq!(issue.status, IssueStatus::WaitingForAttention);
        assert_eq!(issue.criticality, 65);
        assert_eq!(issue.summary, "Pothole reported by 1 person near Main Gate (criticality 65)");
        issue.check_invariants().unwrap();
    }

    #[test]
    fn merge_adds_reporter_and_recomputes_score() {
        let issue = opened();
        let merged = issue
            .merge(&observation("bob", 22.3101), &model(80.0), Utc::now())
            .expect("new reporter merges");
        assert_eq!(merged.confirmation_count(), 2);
        assert_eq!(merged.severity_hints(), vec![60.0, 80.0]);
        // mean 70 + 5 * log2(3)
        assert_eq!(merged.criticality, (70.0 + 5.0 * 3f64.log2()).round() as i32);
        assert_eq!(merged.image_refs(), vec!["alice.jpg", "bob.jpg"]);
        assert_eq!(merged.location, issue.location);
        assert_eq!(merged.version, issue.version);
        merged.check_invariants().unwrap();
    }

    #[test]
    fn merge_same_reporter_is_noop() {
        let issue = opened();
        assert!(issue
            .merge(&observation("alice", 22.3101), &model(90.0), Utc::now())
            .is_none());
    }

    #[test]
    fn with_status_moves_forward() {
        let issue = opened();
        let next = issue
            .with_status(IssueStatus::GotTheAttention, Utc::now())
            .unwrap();
        assert_eq!(next.status, IssueStatus::GotTheAttention);
        assert!(next.is_open());
    }

    // -- admin notes --

    #[test]
    fn admin_notes_are_set_and_kept() {
        let issue = opened()
            .with_admin_notes(Some("Crew dispatched".into()))
            .unwrap();
        assert_eq!(issue.admin_notes.as_deref(), Some("Crew dispatched"));

        let issue = issue.with_admin_notes(None).unwrap();
        assert_eq!(issue.admin_notes.as_deref(), Some("Crew dispatched"));
        let issue = issue.with_admin_notes(Some("  ".into())).unwrap();
        assert_eq!(issue.admin_notes.as_deref(), Some("Crew dispatched"));
    }

    #[test]
    fn admin_notes_length_is_bounded() {
        assert!(opened()
            .with_admin_notes(Some("n".repeat(MAX_ADMIN_NOTES_LEN)))
            .is_ok());
        assert!(opened()
            .with_admin_notes(Some("n".repeat(MAX_ADMIN_NOTES_LEN + 1)))
            .is_err());
    }

    #[test]
    fn with_status_rejects_reopen() {
        let resolved = opened()
            .with_status(IssueStatus::Resolved, Utc::now())
            .unwrap();
        assert!(resolved
            .with_status(IssueStatus::WaitingForAttention, Utc::now())
            .is_err());
    }

    #[test]
    fn invariant_check_catches_drifted_score() {
        let mut issue = opened();
        issue.criticality += 1;
        assert!(issue.check_invariants().is_err());
    }

    #[test]
    fn describe_without_address() {
        assert_eq!(
            describe(IssueCategory::TrashOverflow, 3, 48, None),
            "Trash overflow reported by 3 people (criticality 48)"
        );
    }
}

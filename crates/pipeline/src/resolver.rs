//! Merge-or-create decisions for incoming observations.

use std::sync::Arc;

use urbanwatch_core::category::IssueCategory;
use urbanwatch_core::observation::Observation;
use urbanwatch_core::types::IssueId;
use urbanwatch_db::IssueStore;

use crate::error::PipelineError;
use crate::index::GeoIndex;

/// What to do with an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Fold into this existing open issue.
    MergeInto(IssueId),
    /// Every nearby issue already counts this reporter; nothing to do.
    AlreadyConfirmed(IssueId),
    CreateNew,
}

/// A nearby open issue as seen by the resolver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
    pub issue_id: IssueId,
    pub distance_meters: f64,
    /// The observation's reporter is already among the issue's reporters.
    pub confirmed_by_reporter: bool,
}

/// Pick the target among candidates already ordered nearest first.
///
/// The first candidate the reporter has not confirmed wins. If the reporter
/// has confirmed all of them the nearest one is reported as already
/// confirmed. No candidates means a new issue.
pub fn select_candidate(candidates: &[ScoredCandidate]) -> Decision {
    if let Some(c) = candidates.iter().find(|c| !c.confirmed_by_reporter) {
        return Decision::MergeInto(c.issue_id);
    }
    match candidates.first() {
        Some(c) => Decision::AlreadyConfirmed(c.issue_id),
        None => Decision::CreateNew,
    }
}

/// Matches an observation against open issues of its category.
pub struct ClusterResolver {
    index: Arc<GeoIndex>,
    store: Arc<dyn IssueStore>,
    radius_meters: f64,
}

impl ClusterResolver {
    pub fn new(index: Arc<GeoIndex>, store: Arc<dyn IssueStore>, radius_meters: f64) -> Self {
        Self {
            index,
            store,
            radius_meters,
        }
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_meters
    }

    /// Decide where `observation` goes, given the category it is matched
    /// under.
    ///
    /// Candidates come from the index and are checked against a fresh
    /// store read; ones that were resolved, deleted or recategorised since
    /// they were indexed are skipped.
    pub async fn resolve(
        &self,
        observation: &Observation,
        category: IssueCategory,
    ) -> Result<Decision, PipelineError> {
        let hits = self
            .index
            .query_radius(observation.location, category, self.radius_meters);

        let mut scored = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(issue) = self.store.get(hit.issue_id).await? else {
                continue;
            };
            if !issue.is_open() || issue.category != category {
                continue;
            }
            let confirmed_by_reporter = issue.has_reporter(&observation.reporter_id);
            scored.push(ScoredCandidate {
                issue_id: hit.issue_id,
                distance_meters: hit.distance_meters,
                confirmed_by_reporter,
            });
            // Nearest eligible candidate; nothing further out can beat it.
            if !confirmed_by_reporter {
                break;
            }
        }

        let decision = select_candidate(&scored);
        tracing::debug!(
            observation_id = %observation.id,
            category = %category,
            candidates = scored.len(),
            ?decision,
            "Resolved observation",
        );
        Ok(decision)
    }
}

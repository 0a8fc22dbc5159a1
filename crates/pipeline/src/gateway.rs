//! The only writer of persisted issues.
//!
//! Merges are optimistic: read, fold the observation in, compare-and-swap on
//! the version read. A lost race re-resolves from fresh state. Creates run
//! under the region lock of the observation's location and re-check for a
//! nearby issue before inserting, so two concurrent creates at one spot
//! cannot both open an issue. The index is written only after the store
//! commits, and every committed mutation invalidates the query caches.
//!
//! Region locks are per process. Create serialisation therefore holds for
//! one gateway and the workers sharing it, not for several processes
//! writing to the same Postgres database.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use urbanwatch_core::category::IssueCategory;
use urbanwatch_core::classification::{matching_category, Classification};
use urbanwatch_core::issue::{validate_admin_notes, Issue, NewIssue};
use urbanwatch_core::observation::Observation;
use urbanwatch_core::status::IssueStatus;
use urbanwatch_core::types::IssueId;
use urbanwatch_db::{IssueStore, StoreError};
use urbanwatch_events::bus::{
    EventBus, IssueEvent, ISSUE_CREATED, ISSUE_DELETED, ISSUE_DUPLICATE, ISSUE_MERGED,
    ISSUE_STATUS_CHANGED,
};
use urbanwatch_events::CacheInvalidator;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::index::GeoIndex;
use crate::locks::RegionLocks;
use crate::resolver::{ClusterResolver, Decision};

/// What happened to an observation.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A new issue was opened with this observation as its first evidence.
    Created(Issue),
    /// The observation was folded into an existing issue.
    Merged(Issue),
    /// The reporter already confirmed the nearby issue; nothing changed.
    AlreadyConfirmed(Issue),
}

impl IngestOutcome {
    pub fn issue(&self) -> &Issue {
        match self {
            Self::Created(i) | Self::Merged(i) | Self::AlreadyConfirmed(i) => i,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Merged(_) => "merged",
            Self::AlreadyConfirmed(_) => "already_confirmed",
        }
    }
}

/// Result of one attempt inside the merge-or-create loop.
enum Step {
    Done(IngestOutcome),
    /// Lost a race; re-resolve from fresh state.
    Retry(&'static str),
    /// The locked re-check found a different answer.
    Redirect(Decision),
}

pub struct IssueGateway {
    store: Arc<dyn IssueStore>,
    index: Arc<GeoIndex>,
    resolver: ClusterResolver,
    locks: RegionLocks,
    events: Arc<EventBus>,
    invalidators: Vec<Arc<dyn CacheInvalidator>>,
    config: PipelineConfig,
}

impl IssueGateway {
    pub fn new(
        store: Arc<dyn IssueStore>,
        index: Arc<GeoIndex>,
        events: Arc<EventBus>,
        config: PipelineConfig,
    ) -> Self {
        let resolver = ClusterResolver::new(index.clone(), store.clone(), config.radius_meters);
        Self {
            store,
            index,
            resolver,
            locks: RegionLocks::new(),
            events,
            invalidators: Vec::new(),
            config,
        }
    }

    /// Register a cache to be invalidated after every committed mutation.
    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidators.push(invalidator);
        self
    }

    pub fn store(&self) -> &Arc<dyn IssueStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<GeoIndex> {
        &self.index
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Category the observation is matched and filed under.
    pub fn matching_category(
        &self,
        observation: &Observation,
        classification: &Classification,
    ) -> IssueCategory {
        matching_category(observation, classification, self.config.min_merge_confidence)
    }

    /// First-pass decision for an observation.
    pub async fn resolve(
        &self,
        observation: &Observation,
        classification: &Classification,
    ) -> Result<Decision, PipelineError> {
        let category = self.matching_category(observation, classification);
        self.resolver.resolve(observation, category).await
    }

    /// Reload the index from the store's open issues. Returns the number indexed.
    pub async fn rebuild_index(&self) -> Result<usize, PipelineError> {
        let open = self.store.list_open().await?;
        self.index.rebuild(&open);
        tracing::info!(open_issues = open.len(), "Rebuilt geo index");
        Ok(open.len())
    }

    // -----------------------------------------------------------------------
    // Merge or create
    // -----------------------------------------------------------------------

    /// Apply `decision` for the observation atomically.
    ///
    /// If the target changed underneath (version conflict, resolved,
    /// deleted) the observation is re-resolved against fresh state and the
    /// new decision applied, up to `cas_retries` times.
    pub async fn merge_or_create(
        &self,
        decision: Decision,
        observation: &Observation,
        classification: &Classification,
    ) -> Result<IngestOutcome, PipelineError> {
        let category = self.matching_category(observation, classification);
        let attempts = self.config.cas_retries.max(1);
        let mut decision = decision;

        for attempt in 1..=attempts {
            let step = match decision {
                Decision::MergeInto(id) => {
                    self.try_merge(id, category, observation, classification).await?
                }
                Decision::AlreadyConfirmed(id) => self.already_confirmed(id, observation).await?,
                Decision::CreateNew => self.try_create(category, observation, classification).await?,
            };

            match step {
                Step::Done(outcome) => {
                    tracing::info!(
                        observation_id = %observation.id,
                        issue_id = outcome.issue().id,
                        outcome = outcome.kind(),
                        people_reported = outcome.issue().confirmation_count(),
                        criticality = outcome.issue().criticality,
                        attempt,
                        "Observation persisted",
                    );
                    return Ok(outcome);
                }
                Step::Redirect(next) => decision = next,
                Step::Retry(reason) => {
                    tracing::debug!(
                        observation_id = %observation.id,
                        attempt,
                        reason,
                        "Re-resolving observation",
                    );
                    decision = self.resolver.resolve(observation, category).await?;
                }
            }
        }

        tracing::warn!(observation_id = %observation.id, attempts, "Merge-or-create contention exhausted");
        Err(PipelineError::ContentionExhausted { attempts })
    }

    async fn try_merge(
        &self,
        id: IssueId,
        category: IssueCategory,
        observation: &Observation,
        classification: &Classification,
    ) -> Result<Step, PipelineError> {
        let Some(current) = self.store.get(id).await? else {
            return Ok(Step::Retry("target deleted"));
        };
        if !current.is_open() || current.category != category {
            return Ok(Step::Retry("target no longer matches"));
        }

        let Some(next) = current.merge(observation, classification, Utc::now()) else {
            self.publish_duplicate(&current, observation);
            return Ok(Step::Done(IngestOutcome::AlreadyConfirmed(current)));
        };

        match self.store.compare_and_swap(&next).await {
            Ok(committed) => {
                self.events.publish(
                    IssueEvent::new(ISSUE_MERGED)
                        .with_issue(committed.id)
                        .with_observation(observation.id, &observation.reporter_id)
                        .with_payload(json!({
                            "version": committed.version,
                            "people_reported": committed.confirmation_count(),
                            "criticality": committed.criticality,
                        })),
                );
                self.notify_mutation().await;
                Ok(Step::Done(IngestOutcome::Merged(committed)))
            }
            Err(StoreError::Conflict { .. }) => Ok(Step::Retry("version conflict")),
            Err(StoreError::NotFound(_)) => Ok(Step::Retry("target deleted")),
            Err(e) => Err(e.into()),
        }
    }

    async fn already_confirmed(
        &self,
        id: IssueId,
        observation: &Observation,
    ) -> Result<Step, PipelineError> {
        match self.store.get(id).await? {
            Some(issue) if issue.is_open() && issue.has_reporter(&observation.reporter_id) => {
                self.publish_duplicate(&issue, observation);
                Ok(Step::Done(IngestOutcome::AlreadyConfirmed(issue)))
            }
            _ => Ok(Step::Retry("confirmed issue changed")),
        }
    }

    async fn try_create(
        &self,
        category: IssueCategory,
        observation: &Observation,
        classification: &Classification,
    ) -> Result<Step, PipelineError> {
        let region = self
            .locks
            .lock(observation.location, self.config.radius_meters)
            .await;

        // Another create in this region may have committed while we waited.
        match self.resolver.resolve(observation, category).await? {
            Decision::CreateNew => {}
            other => return Ok(Step::Redirect(other)),
        }

        let new_issue = NewIssue::from_observation(observation, classification, category, Utc::now());
        let issue = self.store.insert(new_issue).await?;
        self.index.insert(issue.id, issue.location, issue.category);
        drop(region);

        self.events.publish(
            IssueEvent::new(ISSUE_CREATED)
                .with_issue(issue.id)
                .with_observation(observation.id, &observation.reporter_id)
                .with_payload(json!({
                    "category": issue.category,
                    "criticality": issue.criticality,
                    "classification_source": classification.source.as_str(),
                })),
        );
        self.notify_mutation().await;
        Ok(Step::Done(IngestOutcome::Created(issue)))
    }

    fn publish_duplicate(&self, issue: &Issue, observation: &Observation) {
        self.events.publish(
            IssueEvent::new(ISSUE_DUPLICATE)
                .with_issue(issue.id)
                .with_observation(observation.id, &observation.reporter_id),
        );
    }

    // -----------------------------------------------------------------------
    // Admin operations
    // -----------------------------------------------------------------------

    /// Move an issue forward in its lifecycle.
    ///
    /// Backward and same-state transitions are rejected. Resolving an issue
    /// removes it from the index. `admin_notes`, when given, replace the
    /// issue's notes in the same write.
    pub async fn transition_status(
        &self,
        id: IssueId,
        status: IssueStatus,
        admin_notes: Option<String>,
    ) -> Result<Issue, PipelineError> {
        if let Some(notes) = &admin_notes {
            validate_admin_notes(notes)?;
        }
        let attempts = self.config.cas_retries.max(1);

        for attempt in 1..=attempts {
            let current = self
                .store
                .get(id)
                .await?
                .ok_or(PipelineError::IssueNotFound(id))?;

            let next = current
                .with_status(status, Utc::now())
                .map_err(|_| PipelineError::InvalidTransition {
                    id,
                    from: current.status,
                    to: status,
                })?
                .with_admin_notes(admin_notes.clone())?;

            match self.store.compare_and_swap(&next).await {
                Ok(committed) => {
                    if !committed.is_open() {
                        self.index.remove(id);
                    }
                    tracing::info!(
                        issue_id = id,
                        from = %current.status,
                        to = %committed.status,
                        "Issue status changed",
                    );
                    self.events.publish(
                        IssueEvent::new(ISSUE_STATUS_CHANGED)
                            .with_issue(id)
                            .with_payload(json!({
                                "from": current.status,
                                "to": committed.status,
                                "admin_notes": committed.admin_notes,
                            })),
                    );
                    self.notify_mutation().await;
                    return Ok(committed);
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(issue_id = id, attempt, "Status change lost a race, retrying");
                }
                Err(StoreError::NotFound(_)) => return Err(PipelineError::IssueNotFound(id)),
                Err(e) => return Err(e.into()),
            }
        }

        Err(PipelineError::ContentionExhausted { attempts })
    }

    /// Remove an issue from the store and the index.
    pub async fn delete_issue(&self, id: IssueId) -> Result<Issue, PipelineError> {
        let issue = self
            .store
            .get(id)
            .await?
            .ok_or(PipelineError::IssueNotFound(id))?;
        if !self.store.delete(id).await? {
            return Err(PipelineError::IssueNotFound(id));
        }
        self.index.remove(id);

        tracing::info!(issue_id = id, "Issue deleted");
        self.events.publish(IssueEvent::new(ISSUE_DELETED).with_issue(id));
        self.notify_mutation().await;
        Ok(issue)
    }

    async fn notify_mutation(&self) {
        for invalidator in &self.invalidators {
            invalidator.invalidate_all().await;
        }
    }
}

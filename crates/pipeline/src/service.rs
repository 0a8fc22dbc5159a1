//! Read-side issue queries with a TTL cache in front of the store.

use std::sync::Arc;

use async_trait::async_trait;
use urbanwatch_core::category::IssueCategory;
use urbanwatch_core::geo::GeoPoint;
use urbanwatch_core::issue::Issue;
use urbanwatch_core::status::IssueStatus;
use urbanwatch_core::summary::{summarize, IssueSummary};
use urbanwatch_core::types::IssueId;
use urbanwatch_db::IssueStore;
use urbanwatch_events::cache::{NEARBY_TTL, PRIORITY_TTL, STATUS_TTL, SUMMARY_TTL};
use urbanwatch_events::{CacheInvalidator, QueryCache};

use crate::error::PipelineError;
use crate::index::GeoIndex;

/// Number of issues returned by [`IssueService::priority`] by default.
pub const DEFAULT_PRIORITY_LIMIT: usize = 4;

pub struct IssueService {
    store: Arc<dyn IssueStore>,
    index: Arc<GeoIndex>,
    lists: QueryCache<Vec<Issue>>,
    summaries: QueryCache<IssueSummary>,
}

impl IssueService {
    pub fn new(store: Arc<dyn IssueStore>, index: Arc<GeoIndex>) -> Self {
        Self {
            store,
            index,
            lists: QueryCache::new(),
            summaries: QueryCache::new(),
        }
    }

    /// Issues in `status`, ordered by id.
    pub async fn query_by_status(&self, status: IssueStatus) -> Result<Vec<Issue>, PipelineError> {
        let key = format!("status:{status}");
        if let Some(hit) = self.lists.get(&key).await {
            return Ok(hit);
        }
        let generation = self.lists.generation();
        let issues = self.store.list_by_status(status).await?;
        self.lists
            .insert_if_generation(key, issues.clone(), STATUS_TTL, generation)
            .await;
        Ok(issues)
    }

    /// Open issues within `radius_meters` of `origin`, nearest first.
    pub async fn query_by_radius(
        &self,
        origin: GeoPoint,
        radius_meters: f64,
        category: Option<IssueCategory>,
    ) -> Result<Vec<Issue>, PipelineError> {
        origin.validate()?;
        let key = format!(
            "nearby:{:.6}:{:.6}:{radius_meters}:{}",
            origin.lat,
            origin.lon,
            category.map_or("any", IssueCategory::as_str)
        );
        if let Some(hit) = self.lists.get(&key).await {
            return Ok(hit);
        }

        let generation = self.lists.generation();
        let candidates = match category {
            Some(c) => self.index.query_radius(origin, c, radius_meters),
            None => self.index.query_radius_any(origin, radius_meters),
        };
        let mut issues = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            // The index may briefly lag a resolve or delete.
            if let Some(issue) = self.store.get(candidate.issue_id).await? {
                if issue.is_open() {
                    issues.push(issue);
                }
            }
        }

        self.lists
            .insert_if_generation(key, issues.clone(), NEARBY_TTL, generation)
            .await;
        Ok(issues)
    }

    /// The `limit` most critical issues still waiting for attention.
    ///
    /// Ordered by criticality descending, then oldest first, then id.
    pub async fn priority(&self, limit: usize) -> Result<Vec<Issue>, PipelineError> {
        let key = format!("priority:{limit}");
        if let Some(hit) = self.lists.get(&key).await {
            return Ok(hit);
        }

        let generation = self.lists.generation();
        let mut issues = self
            .store
            .list_by_status(IssueStatus::WaitingForAttention)
            .await?;
        issues.sort_by(|a, b| {
            b.criticality
                .cmp(&a.criticality)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        issues.truncate(limit);

        self.lists
            .insert_if_generation(key, issues.clone(), PRIORITY_TTL, generation)
            .await;
        Ok(issues)
    }

    /// Issues the reporter has contributed to, ordered by id.
    pub async fn by_reporter(&self, reporter_id: &str) -> Result<Vec<Issue>, PipelineError> {
        let key = format!("reporter:{reporter_id}");
        if let Some(hit) = self.lists.get(&key).await {
            return Ok(hit);
        }
        let generation = self.lists.generation();
        let issues = self.store.list_by_reporter(reporter_id).await?;
        self.lists
            .insert_if_generation(key, issues.clone(), STATUS_TTL, generation)
            .await;
        Ok(issues)
    }

    pub async fn summary(&self) -> Result<IssueSummary, PipelineError> {
        const KEY: &str = "summary";
        if let Some(hit) = self.summaries.get(KEY).await {
            return Ok(hit);
        }
        let generation = self.summaries.generation();
        let summary = summarize(&self.store.list_all().await?);
        self.summaries
            .insert_if_generation(KEY, summary.clone(), SUMMARY_TTL, generation)
            .await;
        Ok(summary)
    }

    pub async fn get(&self, id: IssueId) -> Result<Issue, PipelineError> {
        self.store
            .get(id)
            .await?
            .ok_or(PipelineError::IssueNotFound(id))
    }
}

#[async_trait]
impl CacheInvalidator for IssueService {
    async fn invalidate_all(&self) {
        self.lists.invalidate_all().await;
        self.summaries.invalidate_all().await;
    }
}

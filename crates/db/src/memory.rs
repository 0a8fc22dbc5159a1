//! In-process [`IssueStore`] used by tests and single-node deployments
//! without a database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use urbanwatch_core::issue::{Issue, NewIssue};
use urbanwatch_core::status::IssueStatus;
use urbanwatch_core::types::IssueId;

use crate::store::{IssueStore, StoreError};

/// A `BTreeMap` behind an async `RwLock`. Ids are allocated from 1 upwards.
pub struct MemoryIssueStore {
    issues: RwLock<BTreeMap<IssueId, Issue>>,
    next_id: AtomicI64,
}

impl MemoryIssueStore {
    pub fn new() -> Self {
        Self {
            issues: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored issues.
    pub async fn len(&self) -> usize {
        self.issues.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.issues.read().await.is_empty()
    }

    async fn filtered(&self, keep: impl Fn(&Issue) -> bool) -> Vec<Issue> {
        self.issues
            .read()
            .await
            .values()
            .filter(|issue| keep(issue))
            .cloned()
            .collect()
    }
}

impl Default for MemoryIssueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IssueStore for MemoryIssueStore {
    async fn get(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        Ok(self.issues.read().await.get(&id).cloned())
    }

    async fn insert(&self, issue: NewIssue) -> Result<Issue, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = issue.into_issue(id);
        self.issues.write().await.insert(id, stored.clone());
        Ok(stored)
    }

    async fn compare_and_swap(&self, issue: &Issue) -> Result<Issue, StoreError> {
        let mut issues = self.issues.write().await;
        let current = issues
            .get_mut(&issue.id)
            .ok_or(StoreError::NotFound(issue.id))?;

        if current.version != issue.version {
            return Err(StoreError::Conflict {
                id: issue.id,
                expected: issue.version,
                actual: current.version,
            });
        }

        let mut next = issue.clone();
        next.version = issue.version + 1;
        next.updated_at = next.updated_at.max(Utc::now());
        *current = next.clone();
        Ok(next)
    }

    async fn delete(&self, id: IssueId) -> Result<bool, StoreError> {
        Ok(self.issues.write().await.remove(&id).is_some())
    }

    async fn list_all(&self) -> Result<Vec<Issue>, StoreError> {
        Ok(self.filtered(|_| true).await)
    }

    async fn list_open(&self) -> Result<Vec<Issue>, StoreError> {
        Ok(self.filtered(Issue::is_open).await)
    }

    async fn list_by_status(&self, status: IssueStatus) -> Result<Vec<Issue>, StoreError> {
        Ok(self.filtered(|issue| issue.status == status).await)
    }

    async fn list_by_reporter(&self, reporter_id: &str) -> Result<Vec<Issue>, StoreError> {
        Ok(self.filtered(|issue| issue.has_reporter(reporter_id)).await)
    }
}

//! Postgres-backed [`IssueStore`].

use async_trait::async_trait;
use urbanwatch_core::issue::{Issue, NewIssue};
use urbanwatch_core::status::IssueStatus;
use urbanwatch_core::types::IssueId;

use crate::models::issue::IssueRow;
use crate::repositories::IssueRepo;
use crate::store::{IssueStore, StoreError};
use crate::DbPool;

pub struct PgIssueStore {
    pool: DbPool,
}

impl PgIssueStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn into_issues(rows: Vec<IssueRow>) -> Result<Vec<Issue>, StoreError> {
    rows.into_iter().map(Issue::try_from).collect()
}

#[async_trait]
impl IssueStore for PgIssueStore {
    async fn get(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        IssueRepo::find_by_id(&self.pool, id)
            .await?
            .map(Issue::try_from)
            .transpose()
    }

    async fn insert(&self, issue: NewIssue) -> Result<Issue, StoreError> {
        let row = IssueRepo::insert(&self.pool, &issue).await?;
        Issue::try_from(row)
    }

    async fn compare_and_swap(&self, issue: &Issue) -> Result<Issue, StoreError> {
        if let Some(row) = IssueRepo::update_if_version(&self.pool, issue).await? {
            return Issue::try_from(row);
        }

        // Zero rows matched: either the record moved on or it is gone.
        match IssueRepo::current_version(&self.pool, issue.id).await? {
            Some(actual) => {
                tracing::debug!(issue_id = issue.id, expected = issue.version, actual, "Version conflict");
                Err(StoreError::Conflict {
                    id: issue.id,
                    expected: issue.version,
                    actual,
                })
            }
            None => Err(StoreError::NotFound(issue.id)),
        }
    }

    async fn delete(&self, id: IssueId) -> Result<bool, StoreError> {
        Ok(IssueRepo::delete(&self.pool, id).await?)
    }

    async fn list_all(&self) -> Result<Vec<Issue>, StoreError> {
        into_issues(IssueRepo::list_all(&self.pool).await?)
    }

    async fn list_open(&self) -> Result<Vec<Issue>, StoreError> {
        into_issues(IssueRepo::list_open(&self.pool).await?)
    }

    async fn list_by_status(&self, status: IssueStatus) -> Result<Vec<Issue>, StoreError> {
        into_issues(IssueRepo::list_by_status(&self.pool, status).await?)
    }

    async fn list_by_reporter(&self, reporter_id: &str) -> Result<Vec<Issue>, StoreError> {
        into_issues(IssueRepo::list_by_reporter(&self.pool, reporter_id).await?)
    }
}

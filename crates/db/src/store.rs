//! The storage collaborator interface.
//!
//! [`IssueStore`] is the only way issue records are read or written. Writes
//! to an existing issue go through [`IssueStore::compare_and_swap`], which
//! commits only if nobody else committed since the caller read the record.

use async_trait::async_trait;
use urbanwatch_core::issue::{Issue, NewIssue};
use urbanwatch_core::status::IssueStatus;
use urbanwatch_core::types::IssueId;

/// Errors surfaced by an [`IssueStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer committed first. Re-read and re-evaluate.
    #[error("Version conflict on issue {id}: expected {expected}, found {actual}")]
    Conflict {
        id: IssueId,
        expected: i64,
        actual: i64,
    },

    #[error("Issue {0} not found")]
    NotFound(IssueId),

    /// The backing store could not be reached or timed out.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("Corrupt issue record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(e.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Keyed issue record store with optimistic versioning.
#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Read the current committed state of an issue.
    async fn get(&self, id: IssueId) -> Result<Option<Issue>, StoreError>;

    /// Insert a new issue, allocating its id. The stored issue has version 1.
    async fn insert(&self, issue: NewIssue) -> Result<Issue, StoreError>;

    /// Commit `issue` if the stored version still equals `issue.version`.
    ///
    /// On success the stored record has `version + 1` and is returned. If
    /// another writer got there first, fails with [`StoreError::Conflict`]
    /// and leaves the record untouched.
    async fn compare_and_swap(&self, issue: &Issue) -> Result<Issue, StoreError>;

    /// Remove an issue. Returns `false` when it did not exist.
    async fn delete(&self, id: IssueId) -> Result<bool, StoreError>;

    /// Every issue, ordered by id.
    async fn list_all(&self) -> Result<Vec<Issue>, StoreError>;

    /// Issues that are not resolved, ordered by id.
    async fn list_open(&self) -> Result<Vec<Issue>, StoreError>;

    /// Issues with the given status, ordered by id.
    async fn list_by_status(&self, status: IssueStatus) -> Result<Vec<Issue>, StoreError>;

    /// Issues the reporter contributed to, ordered by id.
    async fn list_by_reporter(&self, reporter_id: &str) -> Result<Vec<Issue>, StoreError>;
}

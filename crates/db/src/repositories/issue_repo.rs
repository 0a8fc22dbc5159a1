//! Repository for the `issues` table.
//!
//! Updates are optimistic: every write to an existing row is guarded by
//! `WHERE id = $1 AND version = $2` and bumps `version` in the same
//! statement, so two writers racing on one issue cannot both commit.

use sqlx::types::Json;
use sqlx::PgPool;
use urbanwatch_core::issue::{Issue, NewIssue};
use urbanwatch_core::status::{IssueStatus, StatusId};
use urbanwatch_core::types::IssueId;

use crate::models::issue::IssueRow;

/// Column list for `issues` queries.
const COLUMNS: &str = "\
    id, version, category, lat, lon, address, reporters, people_reported, \
    evidence, summary, criticality, status_id, admin_notes, created_at, updated_at";

/// Resolved status, the only closed state.
const RESOLVED: StatusId = IssueStatus::Resolved as StatusId;

/// Provides CRUD operations for issues.
pub struct IssueRepo;

impl IssueRepo {
    /// Insert a new issue. The database allocates the id; version starts at 1.
    pub async fn insert(pool: &PgPool, issue: &NewIssue) -> Result<IssueRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO issues \
                 (category, lat, lon, address, reporters, people_reported, evidence, \
                  summary, criticality, status_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11) \
             RETURNING {COLUMNS}"
        );
        let reporters: Vec<String> = issue.reporters.iter().cloned().collect();
        sqlx::query_as::<_, IssueRow>(&query)
            .bind(issue.category.as_str())
            .bind(issue.location.lat)
            .bind(issue.location.lon)
            .bind(&issue.address)
            .bind(&reporters)
            .bind(reporters.len() as i32)
            .bind(Json(&issue.evidence))
            .bind(&issue.summary)
            .bind(issue.criticality)
            .bind(issue.status.id())
            .bind(issue.created_at)
            .fetch_one(pool)
            .await
    }

    /// Find an issue by id.
    pub async fn find_by_id(pool: &PgPool, id: IssueId) -> Result<Option<IssueRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM issues WHERE id = $1");
        sqlx::query_as::<_, IssueRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Write `issue` if the stored version still equals `issue.version`.
    ///
    /// Returns `None` when no row matched (stale version or missing row);
    /// callers distinguish the two with [`IssueRepo::current_version`].
    pub async fn update_if_version(
        pool: &PgPool,
        issue: &Issue,
    ) -> Result<Option<IssueRow>, sqlx::Error> {
        let query = format!(
            "UPDATE issues \
             SET version = version + 1, reporters = $3, people_reported = $4, \
                 evidence = $5, summary = $6, criticality = $7, status_id = $8, \
                 admin_notes = $9, updated_at = GREATEST($10, NOW()) \
             WHERE id = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        let reporters: Vec<String> = issue.reporters.iter().cloned().collect();
        sqlx::query_as::<_, IssueRow>(&query)
            .bind(issue.id)
            .bind(issue.version)
            .bind(&reporters)
            .bind(reporters.len() as i32)
            .bind(Json(&issue.evidence))
            .bind(&issue.summary)
            .bind(issue.criticality)
            .bind(issue.status.id())
            .bind(&issue.admin_notes)
            .bind(issue.updated_at)
            .fetch_optional(pool)
            .await
    }

    /// Current version of an issue, or `None` if it does not exist.
    pub async fn current_version(pool: &PgPool, id: IssueId) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT version FROM issues WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Delete an issue. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, id: IssueId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM issues WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every issue, ordered by id.
    pub async fn list_all(pool: &PgPool) -> Result<Vec<IssueRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM issues ORDER BY id");
        sqlx::query_as::<_, IssueRow>(&query).fetch_all(pool).await
    }

    /// Every unresolved issue, ordered by id.
    pub async fn list_open(pool: &PgPool) -> Result<Vec<IssueRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM issues WHERE status_id <> $1 ORDER BY id");
        sqlx::query_as::<_, IssueRow>(&query)
            .bind(RESOLVED)
            .fetch_all(pool)
            .await
    }

    /// Issues in one status, ordered by id.
    pub async fn list_by_status(
        pool: &PgPool,
        status: IssueStatus,
    ) -> Result<Vec<IssueRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM issues WHERE status_id = $1 ORDER BY id");
        sqlx::query_as::<_, IssueRow>(&query)
            .bind(status.id())
            .fetch_all(pool)
            .await
    }

    /// Issues whose reporter set contains `reporter_id`, ordered by id.
    pub async fn list_by_reporter(
        pool: &PgPool,
        reporter_id: &str,
    ) -> Result<Vec<IssueRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM issues WHERE $1 = ANY(reporters) ORDER BY id");
        sqlx::query_as::<_, IssueRow>(&query)
            .bind(reporter_id)
            .fetch_all(pool)
            .await
    }
}

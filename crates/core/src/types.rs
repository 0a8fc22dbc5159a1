/// Issue primary keys are BIGSERIAL in Postgres and a monotonic counter in memory.
pub type IssueId = i64;

/// Observations are identified at enqueue time, before any store is involved.
pub type ObservationId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

//! Issue persistence: the [`IssueStore`] trait with an in-memory and a
//! Postgres implementation.

use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod models;
pub mod postgres;
pub mod repositories;
pub mod store;

pub use memory::MemoryIssueStore;
pub use postgres::PgIssueStore;
pub use store::{IssueStore, StoreError};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

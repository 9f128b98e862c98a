//! Warehouse connection pool + migrations.
//!
//! The warehouse plays the role the reference application's own `SqlitePool`
//! plays for its app state — except here it *is* the system of record for
//! entities, statistics, and the sync-run ledger (SPEC_FULL.md §6.2), so the
//! pool is sized for sustained write throughput rather than a handful of
//! interactive admin queries.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Create the warehouse pool and run pending migrations.
///
/// Mirrors the reference `db::create_pool` shape: connect, then migrate,
/// so every environment (including a freshly-provisioned warehouse) is
/// schema-current before any service touches it.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

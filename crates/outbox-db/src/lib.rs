//! # Outbox Database
//!
//! Connection pooling and schema migrations for the PostgreSQL row store.

use outbox_config::DbConfig;
use outbox_error::QueueResult;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;

/// Database connection pool type
pub type DbPool = Pool<Postgres>;

/// Create a PostgreSQL connection pool
pub async fn create_pool(database_url: &str, db_config: &DbConfig) -> QueueResult<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .acquire_timeout(Duration::from_secs(db_config.acquire_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(db_config.idle_timeout_secs)))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Apply the outbox schema (idempotent)
pub async fn run_migrations(pool: &DbPool) -> QueueResult<()> {
    tracing::info!("Applying outbox migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Outbox migrations applied");
    Ok(())
}

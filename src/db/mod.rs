//! Persistent storage for tokens, pools, events and statistics.
//!
//! # Architecture
//!
//! - `models`: row structs mapping to the SQL tables
//! - `gateway`: the [`StorageGateway`](gateway::StorageGateway) contract the pipeline depends on
//! - `repository`: the SQLite implementation
//! - Connection pooling with SQLite WAL mode and enforced foreign keys
//! - Embedded migrations from `migrations/`

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{IndexerError, IndexerResult};

pub mod gateway;
pub mod models;
pub mod repository;

pub use gateway::StorageGateway;
pub use repository::Repository;

/// Tables the schema must contain after migrations.
const REQUIRED_TABLES: [&str; 8] = [
    "tokens",
    "pools",
    "swaps",
    "liquidity_events",
    "indexer_cursor",
    "block_hashes",
    "token_statistics",
    "pool_statistics",
];

/// Creates a SQLite connection pool, applies migrations and checks the schema.
///
/// # Configuration
///
/// - **WAL mode**: concurrent readers while the scanner writes
/// - **Busy timeout**: 30 seconds of lock contention before failing
/// - **Foreign keys**: enforced on every connection
///
/// # Example
///
/// ```no_run
/// use dex_pool_indexer::db::create_pool;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool("sqlite:./indexer.db").await?;
///     Ok(())
/// }
/// ```
///
/// # Errors
///
/// Returns a database error if the URL is invalid, the connection fails, or
/// migrations cannot be applied.
pub async fn create_pool(database_url: &str) -> IndexerResult<SqlitePool> {
    info!(database_url, "Connecting to database");

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to parse database URL: {database_url}"),
                Some(Box::new(e)),
            )
        })?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30));

    // Every connection to `:memory:` is a separate database, so pin one.
    let in_memory = database_url.contains(":memory:");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = pool_options
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to connect to database at {database_url}"),
                Some(Box::new(e)),
            )
        })?;

    info!("Running database migrations");
    run_migrations(&pool).await?;
    verify_database(&pool).await?;
    info!("Database migrations complete");

    Ok(pool)
}

/// Applies pending migrations from `migrations/`. Safe to run repeatedly.
///
/// # Errors
///
/// Returns a database error if a migration fails.
pub async fn run_migrations(pool: &SqlitePool) -> IndexerResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            IndexerError::database("Failed to run database migrations", Some(Box::new(e)))
        })?;

    Ok(())
}

/// Verify that required tables exist after migrations.
///
/// # Errors
///
/// Returns a database error naming the count when tables are missing.
pub async fn verify_database(pool: &SqlitePool) -> IndexerResult<()> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT name FROM sqlite_master WHERE type = 'table'",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| IndexerError::database("Failed to verify database schema", Some(Box::new(e))))?;

    let found = REQUIRED_TABLES
        .iter()
        .filter(|table| rows.iter().any(|(name,)| name == *table))
        .count();

    if found < REQUIRED_TABLES.len() {
        return Err(IndexerError::database(
            format!(
                "Database schema incomplete. Expected {} tables, found {found}",
                REQUIRED_TABLES.len()
            ),
            None,
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool_and_migrations() {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("Failed to create pool");

        // Re-running is a no-op.
        run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        verify_database(&pool).await.expect("schema complete");
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("Failed to create pool");

        let result: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("Failed to query foreign keys");

        assert_eq!(result.0, 1, "Foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_pool_rejects_unknown_token_reference() {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("Failed to create pool");

        let result = sqlx::query(
            "INSERT INTO pools (address, token0, token1, fee, liquidity, is_active, created_at, updated_at) \
             VALUES ('0x01', '0x02', '0x03', 3000, '0', 1, 0, 0)",
        )
        .execute(&pool)
        .await;

        assert!(result.is_err(), "pool rows must reference existing tokens");
    }

    #[tokio::test]
    async fn test_cursor_survives_reopen_on_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite:{}", dir.path().join("indexer.db").display());

        let pool = create_pool(&url).await.expect("first open");
        Repository::new(pool.clone())
            .set_cursor(4_242)
            .await
            .expect("set cursor");
        pool.close().await;

        let reopened = Repository::new(create_pool(&url).await.expect("second open"));
        let cursor = reopened.get_cursor().await.expect("read").expect("cursor row");
        assert_eq!(cursor.last_block_u64(), 4_242);
    }
}

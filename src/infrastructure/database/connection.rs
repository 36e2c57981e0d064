//! Database connection pool manager.
//!
//! Manages a SQLite connection pool with WAL mode enabled for better
//! concurrency. Handles connection lifecycle, migrations, and the schema
//! evolution pass.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::error::StoreError;

use super::schema;

/// Connection pool over the embedded database.
///
/// Configuration:
/// - Journal mode: WAL (Write-Ahead Logging)
/// - Synchronous: NORMAL
/// - Foreign keys: enabled
/// - Busy timeout: 5 seconds
/// - Pool: 1-10 connections, 10 second acquire timeout
#[derive(Debug)]
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Create a new connection pool.
    ///
    /// `database_url` is a SQLite URL, e.g. `sqlite:.hive-mind/hive.db` or
    /// `sqlite::memory:`. An unavailable backing engine surfaces as
    /// `StoreError::Unavailable` so callers can downgrade to the in-memory
    /// store.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        Self::new_with_pool_size(database_url, 10).await
    }

    /// Create a pool with an explicit connection bound.
    ///
    /// `sqlite::memory:` databases are per-connection, so in-memory callers
    /// must use a pool size of 1 to see one coherent database.
    pub async fn new_with_pool_size(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .idle_timeout(Duration::from_secs(30))
            .max_lifetime(Duration::from_secs(1800))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to open database: {e}")))?;

        Ok(Self { pool })
    }

    /// Run embedded migrations, then the additive schema-evolution pass.
    ///
    /// Safe to call multiple times; only pending migrations apply, and
    /// evolution never drops or renames columns.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        schema::run_migrations(&self.pool).await?;
        schema::evolve_schema(&self.pool).await?;
        Ok(())
    }

    /// Pool reference for store implementations.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool. Safe to call more than once.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

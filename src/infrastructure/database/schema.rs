//! Embedded schema migrations and additive schema evolution.
//!
//! Migrations are versioned SQL scripts applied through a
//! `schema_migrations` table. After migrations, an evolution pass probes
//! each table for columns a newer reader requires and adds any that are
//! missing with their documented defaults. Columns are never dropped or
//! renamed, so older rows stay readable.

use sqlx::{Row, SqlitePool};

use crate::domain::error::StoreError;

/// One versioned migration script.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All embedded migrations, in order.
pub fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial hive schema",
        sql: include_str!("../../../migrations/001_initial_schema.sql"),
    }]
}

/// Apply pending migrations. Returns the number applied.
pub async fn run_migrations(pool: &SqlitePool) -> Result<usize, StoreError> {
    ensure_migrations_table(pool).await?;
    let current = current_version(pool).await?;

    let pending: Vec<Migration> = all_migrations()
        .into_iter()
        .filter(|m| m.version > current)
        .collect();

    for migration in &pending {
        sqlx::raw_sql(migration.sql)
            .execute(pool)
            .await
            .map_err(|e| {
                StoreError::Schema(format!("migration {} failed: {e}", migration.version))
            })?;

        sqlx::query("INSERT OR IGNORE INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(pool)
            .await
            .map_err(|e| {
                StoreError::Schema(format!(
                    "recording migration {} failed: {e}",
                    migration.version
                ))
            })?;
    }

    Ok(pending.len())
}

async fn ensure_migrations_table(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now')),
            description TEXT
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Schema(format!("creating schema_migrations failed: {e}")))?;
    Ok(())
}

async fn current_version(pool: &SqlitePool) -> Result<i64, StoreError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_optional(pool)
            .await
            .map_err(|e| StoreError::Schema(format!("reading schema version failed: {e}")))?;
    Ok(row.map_or(0, |(v,)| v))
}

/// Columns a current reader requires, with the declaration used when a
/// deployed database predates them. Additions here must stay additive and
/// backward-compatible.
const REQUIRED_COLUMNS: &[(&str, &str, &str)] = &[
    ("sessions", "resumed_at", "INTEGER"),
    ("sessions", "completion_percentage", "REAL NOT NULL DEFAULT 0"),
    ("sessions", "parent_pid", "INTEGER NOT NULL DEFAULT 0"),
    ("sessions", "child_pids", "TEXT NOT NULL DEFAULT '[]'"),
    ("agents", "tasks_attempted", "INTEGER NOT NULL DEFAULT 0"),
    ("tasks", "retry_count", "INTEGER NOT NULL DEFAULT 0"),
    ("memory_entries", "compressed", "INTEGER NOT NULL DEFAULT 0"),
    ("memory_entries", "size_bytes", "INTEGER NOT NULL DEFAULT 0"),
];

/// Probe every table for required columns and add any that are missing.
pub async fn evolve_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    for (table, column, decl) in REQUIRED_COLUMNS {
        if !column_exists(pool, table, column).await? {
            tracing::info!(table, column, "adding missing column");
            let statement = format!("ALTER TABLE {table} ADD COLUMN {column} {decl}");
            sqlx::query(&statement).execute(pool).await.map_err(|e| {
                StoreError::Schema(format!("adding column {table}.{column} failed: {e}"))
            })?;
        }
    }
    Ok(())
}

async fn column_exists(
    pool: &SqlitePool,
    table: &str,
    column: &str,
) -> Result<bool, StoreError> {
    let statement = format!("PRAGMA table_info({table})");
    let rows = sqlx::query(&statement)
        .fetch_all(pool)
        .await
        .map_err(|e| StoreError::Schema(format!("probing {table} failed: {e}")))?;

    for row in rows {
        let name: String = row
            .try_get("name")
            .map_err(|e| StoreError::Schema(format!("reading table_info of {table}: {e}")))?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

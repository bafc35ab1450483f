//! SQLite initialization for the durable cache tier
//!
//! Each cached resource class gets its own keyed table with an `expiry` index
//! (stale-key scans) and an `updated_at` index (recently-changed feeds).

use crate::{Error, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (or create) the cache database at `db_path`
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new cache database: {}", db_path.display());
    } else {
        info!("Opened existing cache database: {}", db_path.display());
    }

    // WAL lets the crawler and server processes read while the other writes
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_rate_limit_table(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database
///
/// Limited to one connection: every `:memory:` connection is a separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    create_rate_limit_table(&pool).await?;

    Ok(pool)
}

/// Create the table backing one durable cache
pub async fn create_cache_table(pool: &SqlitePool, table: &str) -> Result<()> {
    validate_table_name(table)?;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            key TEXT PRIMARY KEY,
            expiry INTEGER,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {table}_expiry_idx ON {table} (expiry)"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {table}_updated_at_idx ON {table} (updated_at)"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Shared admission counters for cooperative rate limiting across processes
async fn create_rate_limit_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rate_limit_counters (
            key TEXT PRIMARY KEY,
            count INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Table names are interpolated into SQL, so only `[a-z_]` is accepted
fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_lowercase() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Invalid cache table name: {:?}", table)))
    }
}

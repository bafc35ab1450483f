//! SQLite-backed durable tier
//!
//! One table per resource class. The `value` column holds the serialized
//! [`CacheEntry`] so a read yields value and expiry together; the `expiry`
//! column duplicates the expiry for the stale-key index.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mdagg_common::{db, time, Result};
use serde_json::Value;
use sqlx::SqlitePool;

use super::{CacheEntry, CacheTier, DurableTier};

pub struct SqliteTier {
    pool: SqlitePool,
    table: String,
}

impl SqliteTier {
    /// Open the tier for `table`, creating the table if needed
    pub async fn open(pool: SqlitePool, table: &str) -> Result<Self> {
        db::create_cache_table(&pool, table).await?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn upsert_sql(&self) -> String {
        format!(
            r#"
            INSERT INTO {t} (key, expiry, value, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                expiry = excluded.expiry,
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            t = self.table
        )
    }
}

fn encode(value: Value, ttl: Option<Duration>) -> Result<(Option<i64>, String)> {
    let entry = CacheEntry::new(value, ttl);
    let expiry = entry.expiry.map(time::to_millis);
    Ok((expiry, serde_json::to_string(&entry)?))
}

fn decode(blob: &str) -> Result<CacheEntry<Value>> {
    Ok(serde_json::from_str(blob)?)
}

#[async_trait]
impl CacheTier for SqliteTier {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Value>>> {
        let blob: Option<String> =
            sqlx::query_scalar(&format!("SELECT value FROM {} WHERE key = ?", self.table))
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        blob.as_deref().map(decode).transpose()
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let (expiry, blob) = encode(value, ttl)?;

        sqlx::query(&self.upsert_sql())
            .bind(key)
            .bind(expiry)
            .bind(blob)
            .bind(time::to_millis(time::now()))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE key = ?", self.table))
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let blob: Option<String> =
            sqlx::query_scalar(&format!("SELECT value FROM {} WHERE key = ?", self.table))
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(blob) = blob else {
            return Ok(false);
        };

        let mut entry = decode(&blob)?;
        let expiry = time::expiry_after(ttl);
        entry.expiry = Some(expiry);

        // updated_at tracks value changes, so it is left alone
        sqlx::query(&format!(
            "UPDATE {} SET expiry = ?, value = ? WHERE key = ?",
            self.table
        ))
        .bind(time::to_millis(expiry))
        .bind(serde_json::to_string(&entry)?)
        .bind(key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn multi_set(&self, pairs: Vec<(String, Value)>, ttl: Option<Duration>) -> Result<()> {
        let sql = self.upsert_sql();
        let updated_at = time::to_millis(time::now());
        let mut tx = self.pool.begin().await?;

        for (key, value) in pairs {
            let (expiry, blob) = encode(value, ttl)?;
            sqlx::query(&sql)
                .bind(key)
                .bind(expiry)
                .bind(blob)
                .bind(updated_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Value, ttl: Duration) -> Result<bool> {
        let now = time::to_millis(time::now());
        let (expiry, blob) = encode(value, Some(ttl))?;

        // The upsert only fires over an expired row, so a fresh holder wins
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {t} (key, expiry, value, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                expiry = excluded.expiry,
                value = excluded.value,
                updated_at = excluded.updated_at
            WHERE {t}.expiry IS NOT NULL AND {t}.expiry <= ?
            "#,
            t = self.table
        ))
        .bind(key)
        .bind(expiry)
        .bind(blob)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DurableTier for SqliteTier {
    async fn get_stale(&self, count: usize, before: DateTime<Utc>) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar(&format!(
            "SELECT key FROM {} WHERE expiry IS NOT NULL AND expiry <= ? ORDER BY expiry ASC LIMIT ?",
            self.table
        ))
        .bind(time::to_millis(before))
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }
}

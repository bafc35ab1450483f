//! Admission control for outbound calls
//!
//! A counting limiter admits at most `queue_size` calls per window. The window
//! starts when the counter goes from 0 to 1 and resets once it expires. Counters
//! live in a [`CounterStore`]; the SQLite store lets several processes on one
//! host share a budget.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mdagg_common::{time, Result};
use parking_lot::Mutex;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allowed(&self) -> Result<bool>;

    async fn record(&self) -> Result<()>;

    /// Check and record in one step
    async fn try_acquire(&self) -> Result<bool> {
        if self.allowed().await? {
            self.record().await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Always admits
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRateLimiter;

#[async_trait]
impl RateLimiter for NullRateLimiter {
    async fn allowed(&self) -> Result<bool> {
        Ok(true)
    }

    async fn record(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared counters with a self-resetting expiry
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count, zero if the window has expired
    async fn count(&self, key: &str) -> Result<u64>;

    /// Increment and return the new count; sets the expiry only on 0 -> 1
    async fn increment(&self, key: &str, window: Duration) -> Result<u64>;
}

#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, (u64, DateTime<Utc>)>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn count(&self, key: &str) -> Result<u64> {
        let now = time::now();
        let counters = self.counters.lock();
        Ok(match counters.get(key) {
            Some((count, expires_at)) if *expires_at > now => *count,
            _ => 0,
        })
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<u64> {
        let now = time::now();
        let mut counters = self.counters.lock();
        let entry = counters.entry(key.to_string()).or_insert((0, now));

        if entry.1 <= now {
            *entry = (1, now + window);
        } else {
            entry.0 += 1;
        }

        Ok(entry.0)
    }
}

/// Counters in the `rate_limit_counters` table
pub struct SqliteCounterStore {
    pool: SqlitePool,
}

impl SqliteCounterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn count(&self, key: &str) -> Result<u64> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT count FROM rate_limit_counters WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(time::to_millis(time::now()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<u64> {
        let now = time::now();

        // Single statement so concurrent processes cannot both reset the window
        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limit_counters (key, count, expires_at)
            VALUES (?1, 1, ?2)
            ON CONFLICT(key) DO UPDATE SET
                count = CASE WHEN rate_limit_counters.expires_at <= ?3
                             THEN 1 ELSE rate_limit_counters.count + 1 END,
                expires_at = CASE WHEN rate_limit_counters.expires_at <= ?3
                                  THEN ?2 ELSE rate_limit_counters.expires_at END
            RETURNING count
            "#,
        )
        .bind(key)
        .bind(time::to_millis(now + window))
        .bind(time::to_millis(now))
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }
}

/// Admits while the shared counter is below `queue_size`
pub struct CountingRateLimiter {
    key: String,
    queue_size: u64,
    window: Duration,
    store: Arc<dyn CounterStore>,
}

impl CountingRateLimiter {
    pub fn new(
        key: impl Into<String>,
        queue_size: u64,
        window: Duration,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            key: key.into(),
            queue_size,
            window,
            store,
        }
    }
}

#[async_trait]
impl RateLimiter for CountingRateLimiter {
    async fn allowed(&self) -> Result<bool> {
        Ok(self.store.count(&self.key).await? < self.queue_size)
    }

    async fn record(&self) -> Result<()> {
        self.store.increment(&self.key, self.window).await?;
        Ok(())
    }
}

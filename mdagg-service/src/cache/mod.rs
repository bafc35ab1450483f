//! Dual-tier cache
//!
//! Both tiers store `(value, expiry)` pairs behind the object-safe [`CacheTier`]
//! trait; values travel as `serde_json::Value` and the typed [`Cache`] wrapper
//! handles (de)serialization and key prefixes.
//!
//! Expiry rules:
//! - `ttl: None` stores an entry that never expires
//! - a zero or negative TTL stores a "known but stale" entry that stays readable
//! - only `delete` (or `clear`) makes a key unreadable

mod cached_call;
mod memory;
mod sqlite;

pub use cached_call::{cached_call, CachePolicy};
pub use memory::MemoryTier;
pub use sqlite::SqliteTier;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mdagg_common::{time, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// Stored value paired with its absolute expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expiry: Option<DateTime<Utc>>,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expiry: ttl.map(time::expiry_after),
        }
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map_or(true, |expiry| now < expiry)
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(time::now())
    }

    /// Expiry as an instant; a never-expiring entry reports the far future
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expiry.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// One cache tier
#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Value>>>;

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Replace the expiry without touching the value; returns whether the key existed
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn multi_set(&self, pairs: Vec<(String, Value)>, ttl: Option<Duration>) -> Result<()>;

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<CacheEntry<Value>>>> {
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            entries.push(self.get(key).await?);
        }
        Ok(entries)
    }

    /// Atomically store `value` unless a fresh entry exists; returns whether it stored
    async fn set_if_absent(&self, key: &str, value: Value, ttl: Duration) -> Result<bool>;

    async fn clear(&self) -> Result<()>;
}

/// A tier that survives restarts and can be scanned for stale keys
#[async_trait]
pub trait DurableTier: CacheTier {
    /// Up to `count` keys with `expiry <= before`, soonest-expiring first
    async fn get_stale(&self, count: usize, before: DateTime<Utc>) -> Result<Vec<String>>;
}

/// Typed view of a tier under a key prefix
pub struct Cache<V, T: ?Sized = dyn CacheTier> {
    tier: Arc<T>,
    prefix: String,
    _value: PhantomData<fn() -> V>,
}

impl<V, T: ?Sized> Clone for Cache<V, T> {
    fn clone(&self) -> Self {
        Self {
            tier: self.tier.clone(),
            prefix: self.prefix.clone(),
            _value: PhantomData,
        }
    }
}

impl<V, T> Cache<V, T>
where
    V: Serialize + DeserializeOwned,
    T: CacheTier + ?Sized,
{
    pub fn new(tier: Arc<T>) -> Self {
        Self::with_prefix(tier, "")
    }

    pub fn with_prefix(tier: Arc<T>, prefix: impl Into<String>) -> Self {
        Self {
            tier,
            prefix: prefix.into(),
            _value: PhantomData,
        }
    }

    pub fn tier(&self) -> &Arc<T> {
        &self.tier
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Entry regardless of freshness
    ///
    /// A null value (pre-seeded "known but unfetched" id) reads as absent, as
    /// does an entry that no longer decodes as `V`.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        let Some(entry) = self.tier.get(&self.key(key)).await? else {
            return Ok(None);
        };

        if entry.value.is_null() {
            return Ok(None);
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => Ok(Some(CacheEntry {
                value,
                expiry: entry.expiry,
            })),
            Err(e) => {
                warn!(key = %self.key(key), error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    /// Entry only if still fresh
    pub async fn get_fresh(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        Ok(self.get(key).await?.filter(CacheEntry::is_fresh))
    }

    pub async fn set(&self, key: &str, value: &V, ttl: Option<Duration>) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.tier.set(&self.key(key), value, ttl).await
    }

    /// Store with an absolute expiry; a past expiry stores a stale entry
    pub async fn set_until(&self, key: &str, value: &V, expiry: DateTime<Utc>) -> Result<()> {
        let ttl = (expiry != DateTime::<Utc>::MAX_UTC).then(|| time::ttl_until(expiry));
        self.set(key, value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.tier.delete(&self.key(key)).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.tier.expire(&self.key(key), ttl).await
    }

    pub async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<V>>> {
        let full_keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let entries = self.tier.multi_get(&full_keys).await?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                entry
                    .filter(|e| !e.value.is_null())
                    .and_then(|e| serde_json::from_value(e.value).ok())
            })
            .collect())
    }

    /// Register ids as known but unfetched: null value, already stale
    pub async fn seed(&self, ids: Vec<String>) -> Result<()> {
        let pairs = ids
            .into_iter()
            .map(|id| (self.key(&id), Value::Null))
            .collect();
        self.tier.multi_set(pairs, Some(Duration::zero())).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.tier.clear().await
    }
}

impl<V> Cache<V, dyn DurableTier>
where
    V: Serialize + DeserializeOwned,
{
    /// Stale keys with the prefix stripped
    pub async fn get_stale(&self, count: usize, before: DateTime<Utc>) -> Result<Vec<String>> {
        let keys = self.tier.get_stale(count, before).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }
}

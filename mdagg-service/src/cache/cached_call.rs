//! Read-through wrapper for a single upstream fetch

use chrono::Duration;
use mdagg_common::time;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use tracing::{debug, warn};

use super::{Cache, CacheTier};
use crate::error::ProviderError;
use crate::models::Timed;

/// TTLs applied by [`cached_call`]
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    /// Lifetime of a successfully fetched value
    pub ttl: Duration,
    /// Lifetime of a stale value re-served because the upstream failed
    pub error_ttl: Duration,
}

/// Fetch `key` through `cache`
///
/// - a fresh hit returns without calling `fetch` (unless `force`)
/// - `fetch` receives the previously cached value, fresh or stale, if any
/// - success is stored for `policy.ttl`
/// - an unavailable upstream re-serves the previous value, re-stored for
///   `policy.error_ttl`; with no previous value the error propagates
/// - `NotFound` deletes the entry and propagates
///
/// Cache read and write failures are logged and otherwise ignored.
pub async fn cached_call<V, T, F, Fut>(
    cache: &Cache<V, T>,
    key: &str,
    policy: CachePolicy,
    force: bool,
    fetch: F,
) -> Result<Timed<V>, ProviderError>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
    T: CacheTier + ?Sized,
    F: FnOnce(Option<V>) -> Fut,
    Fut: Future<Output = Result<V, ProviderError>>,
{
    let cached = match cache.get(key).await {
        Ok(entry) => entry,
        Err(e) => {
            warn!(key, error = %e, "Cache read failed");
            None
        }
    };

    if !force {
        if let Some(entry) = cached.as_ref().filter(|e| e.is_fresh()) {
            return Ok(Timed::new(entry.value.clone(), entry.expires_at()));
        }
    }

    let previous = cached.map(|entry| entry.value);

    match fetch(previous.clone()).await {
        Ok(value) => {
            store(cache, key, &value, policy.ttl).await;
            Ok(Timed::new(value, time::expiry_after(policy.ttl)))
        }
        Err(ProviderError::NotFound) => {
            if let Err(e) = cache.delete(key).await {
                warn!(key, error = %e, "Cache delete failed");
            }
            Err(ProviderError::NotFound)
        }
        Err(e) if e.is_unavailable() => match previous {
            Some(value) => {
                debug!(key, error = %e, "Upstream unavailable, serving stale value");
                store(cache, key, &value, policy.error_ttl).await;
                Ok(Timed::new(value, time::expiry_after(policy.error_ttl)))
            }
            None => Err(e),
        },
        Err(e) => Err(e),
    }
}

async fn store<V, T>(cache: &Cache<V, T>, key: &str, value: &V, ttl: Duration)
where
    V: Serialize + DeserializeOwned,
    T: CacheTier + ?Sized,
{
    if let Err(e) = cache.set(key, value, Some(ttl)).await {
        warn!(key, error = %e, "Cache write failed");
    }
}

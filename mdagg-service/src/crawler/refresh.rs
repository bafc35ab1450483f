//! Refresh loop
//!
//! Pulls the soonest-expiring keys of one durable cache and rebuilds them
//! before they expire. Keys that fail, or that come back with an expiry still
//! inside the lookahead window, are parked in a [`RetrySchedule`] so the loop
//! moves on to other keys. Stored expiries are never moved later: an entry
//! that failed to refresh stays stale and the request path re-fetches it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use mdagg_common::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capabilities::CacheRefresh;
use crate::error::AggregateError;

#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    pub batch_size: usize,
    /// Keys expiring within this window are refreshed
    pub max_lookahead: Duration,
    /// How long a key whose refresh did not stick is skipped
    pub failure_backoff: Duration,
    pub empty_backoff: std::time::Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub refreshed: usize,
    /// Gone upstream and deleted
    pub removed: usize,
    /// Rebuilt, but expiring again within the lookahead window
    pub deferred: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn progressed(&self) -> bool {
        self.refreshed + self.removed > 0
    }
}

/// Keys the loop skips until their retry time, held in memory only
#[derive(Debug, Default)]
pub struct RetrySchedule {
    retry_at: HashMap<String, DateTime<Utc>>,
}

impl RetrySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop keys whose retry time has passed
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.retry_at.retain(|_, at| *at > now);
    }

    pub fn is_waiting(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.retry_at.get(key).is_some_and(|at| *at > now)
    }

    pub fn postpone(&mut self, key: &str, until: DateTime<Utc>) {
        self.retry_at.insert(key.to_string(), until);
    }

    pub fn forget(&mut self, key: &str) {
        self.retry_at.remove(key);
    }

    pub fn len(&self) -> usize {
        self.retry_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retry_at.is_empty()
    }
}

/// Refresh one batch of stale keys
///
/// Per-key failures are absorbed. Only a failure to read the stale keys or a
/// missing provider ends the batch with an error.
pub async fn refresh_batch(
    target: &dyn CacheRefresh,
    settings: &RefreshSettings,
    retries: &mut RetrySchedule,
) -> Result<BatchOutcome, AggregateError> {
    let durable = target.durable();
    let now = time::now();
    let cutoff = now + settings.max_lookahead;
    retries.prune(now);

    // Over-fetch by the parked keys so a full batch remains after skipping them
    let keys: Vec<String> = durable
        .get_stale(settings.batch_size + retries.len(), cutoff)
        .await?
        .into_iter()
        .filter(|key| !retries.is_waiting(key, now))
        .take(settings.batch_size)
        .collect();

    let mut outcome = BatchOutcome::default();
    if keys.is_empty() {
        return Ok(outcome);
    }

    let results = join_all(keys.iter().map(|key| target.refresh(key))).await;
    let retry_at = now + settings.failure_backoff;

    for (key, result) in keys.iter().zip(results) {
        match result {
            Ok(expiry) if expiry > cutoff => {
                outcome.refreshed += 1;
                retries.forget(key);
            }
            Ok(expiry) => {
                // Come back once it has actually lapsed, if that is sooner
                outcome.deferred += 1;
                retries.postpone(key, expiry.min(retry_at));
            }
            Err(e) if e.is_not_found() => {
                outcome.removed += 1;
                retries.forget(key);
            }
            Err(AggregateError::MissingProvider(capability)) => {
                return Err(AggregateError::MissingProvider(capability));
            }
            Err(e) => {
                warn!(cache = target.cache_name(), key = %key, error = %e, "Refresh failed");
                outcome.failed += 1;
                retries.postpone(key, retry_at);
            }
        }
    }

    debug!(cache = target.cache_name(), ?outcome, waiting = retries.len(), "Refresh batch done");
    Ok(outcome)
}

/// Refresh until cancelled; sleeps `empty_backoff` whenever a batch made no progress
pub async fn run_refresh_loop(
    target: &dyn CacheRefresh,
    settings: &RefreshSettings,
    cancel: &CancellationToken,
) -> Result<(), AggregateError> {
    let mut retries = RetrySchedule::new();
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            outcome = refresh_batch(target, settings, &mut retries) => outcome?,
        };

        if !outcome.progressed() {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(settings.empty_backoff) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_schedule_prunes_elapsed_keys() {
        let now = time::now();
        let mut retries = RetrySchedule::new();
        retries.postpone("a", now - Duration::seconds(1));
        retries.postpone("b", now + Duration::minutes(5));

        assert!(!retries.is_waiting("a", now));
        assert!(retries.is_waiting("b", now));

        retries.prune(now);
        assert_eq!(retries.len(), 1);

        retries.forget("b");
        assert!(retries.is_empty());
    }
}

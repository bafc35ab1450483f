//! Invalidation sweep
//!
//! Asks every `InvalidateCache` provider what changed since its stored
//! watermark, force-expires the affected composites in both tiers, purges
//! their public URLs from the edge cache and only then advances the
//! watermarks. A sweep that fails part way leaves the watermarks alone so the
//! next sweep covers the same window again.
//!
//! At most one sweep runs per deployment: the `invalidation_lock` key in the
//! meta tier is taken with an atomic set-if-absent and always released.

use chrono::{DateTime, Duration, Utc};
use mdagg_common::time;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::purge::EdgePurger;
use crate::aggregator::DurableTiers;
use crate::cache::{Cache, CacheTier};
use crate::capabilities::InvalidateCache;
use crate::error::SweepError;
use crate::models::InvalidationResult;
use crate::registry::Registry;

pub const LOCK_KEY: &str = "invalidation_lock";
const WATERMARK_PREFIX: &str = "watermark:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Another sweep holds the lock; nothing was done
    AlreadyRunning,
    /// Public URLs of every expired composite
    Completed { purged: Vec<String> },
}

pub struct InvalidationSweep {
    registry: Arc<Registry>,
    meta: Arc<dyn CacheTier>,
    fast: Arc<dyn CacheTier>,
    durable: DurableTiers,
    purger: EdgePurger,
    public_base: String,
    lock_ttl: Duration,
}

impl InvalidationSweep {
    pub fn new(
        registry: Arc<Registry>,
        meta: Arc<dyn CacheTier>,
        fast: Arc<dyn CacheTier>,
        durable: DurableTiers,
        purger: EdgePurger,
        public_base: impl Into<String>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            meta,
            fast,
            durable,
            purger,
            public_base: public_base.into(),
            lock_ttl,
        }
    }

    fn watermarks(&self) -> Cache<DateTime<Utc>> {
        Cache::with_prefix(self.meta.clone(), WATERMARK_PREFIX)
    }

    pub async fn run(&self) -> Result<SweepOutcome, SweepError> {
        let acquired = self
            .meta
            .set_if_absent(LOCK_KEY, json!(time::now()), self.lock_ttl)
            .await?;

        if !acquired {
            info!("Invalidation sweep already running");
            return Ok(SweepOutcome::AlreadyRunning);
        }

        let result = self.sweep().await;

        if let Err(e) = self.meta.delete(LOCK_KEY).await {
            warn!(error = %e, "Failed to release invalidation lock");
        }

        match &result {
            Ok(purged) => info!(count = purged.len(), "Invalidation sweep completed"),
            Err(e) => warn!(error = %e, "Invalidation sweep failed, watermarks not advanced"),
        }

        result.map(|purged| SweepOutcome::Completed { purged })
    }

    async fn sweep(&self) -> Result<Vec<String>, SweepError> {
        let watermarks = self.watermarks();
        let mut changed = InvalidationResult::default();
        let mut advanced = Vec::new();

        for provider in self.registry.implementing::<dyn InvalidateCache>() {
            let name = provider.watermark_name();
            let current = provider.current_watermark().await?;

            match watermarks.get(name).await?.map(|entry| entry.value) {
                None => {
                    info!(provider = name, watermark = %current, "Recording initial watermark");
                    advanced.push((name, current));
                }
                Some(last) if current > last => {
                    let found = provider.changed_since(last, current).await?;
                    debug!(provider = name, since = %last, until = %current, changed = found.len(), "Upstream changes");
                    changed.union(found);
                    advanced.push((name, current));
                }
                Some(_) => debug!(provider = name, "Watermark unchanged"),
            }
        }

        self.expire(&changed).await?;

        let urls = self.public_urls(&changed);
        self.purger.purge(&urls).await;

        for (name, current) in advanced {
            watermarks.set(name, &current, None).await?;
        }

        Ok(urls)
    }

    /// Force-expire without deleting, so the values stay servable as fallback
    async fn expire(&self, changed: &InvalidationResult) -> Result<(), SweepError> {
        let past = Duration::seconds(-1);

        for id in &changed.artists {
            self.durable.artists.expire(id, past).await?;
            self.fast.expire(&format!("artist:{}", id), past).await?;
            self.fast.expire(&format!("artist_albums:{}", id), past).await?;
        }

        for id in &changed.albums {
            self.durable.albums.expire(id, past).await?;
            self.fast.expire(&format!("album:{}", id), past).await?;
        }

        Ok(())
    }

    fn public_urls(&self, changed: &InvalidationResult) -> Vec<String> {
        changed
            .artists
            .iter()
            .map(|id| format!("{}/artist/{}", self.public_base, id))
            .chain(
                changed
                    .albums
                    .iter()
                    .map(|id| format!("{}/album/{}", self.public_base, id)),
            )
            .collect()
    }
}

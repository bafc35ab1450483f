//! Freshness and invalidation crawler
//!
//! The crawler process runs one refresh loop per durable composite cache
//! (artist, album) and one per provider-owned cache (overview text, artwork),
//! independently of request traffic.
//!
//! The periodic invalidation sweep runs in the server process instead, since it
//! has to expire the fast tier that requests are served from.
//!
//! Every loop runs under [`supervise`], which restarts it after a backoff when
//! it fails and stops it when the shared token is cancelled.

pub mod invalidate;
pub mod purge;
pub mod refresh;

pub use invalidate::{InvalidationSweep, SweepOutcome};
pub use purge::EdgePurger;
pub use refresh::{refresh_batch, run_refresh_loop, BatchOutcome, RefreshSettings, RetrySchedule};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::cache::{Cache, DurableTier};
use crate::capabilities::{ArtistIdList, CacheRefresh, ReleaseGroupIdList};
use crate::config::CrawlerConfig;
use crate::error::{AggregateError, SweepError};
use crate::models::{Artist, ReleaseGroup};

/// Artist composites as a refresh target
pub struct ArtistRefresh(pub Arc<Aggregator>);

#[async_trait]
impl CacheRefresh for ArtistRefresh {
    fn cache_name(&self) -> &str {
        "artist"
    }

    fn durable(&self) -> Arc<dyn DurableTier> {
        self.0.artist_durable()
    }

    async fn refresh(&self, key: &str) -> Result<DateTime<Utc>, AggregateError> {
        self.0.refresh_artist(key).await
    }
}

/// Release group composites as a refresh target
pub struct AlbumRefresh(pub Arc<Aggregator>);

#[async_trait]
impl CacheRefresh for AlbumRefresh {
    fn cache_name(&self) -> &str {
        "album"
    }

    fn durable(&self) -> Arc<dyn DurableTier> {
        self.0.album_durable()
    }

    async fn refresh(&self, key: &str) -> Result<DateTime<Utc>, AggregateError> {
        self.0.refresh_album(key).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CrawlerSettings {
    pub artist: RefreshSettings,
    pub album: RefreshSettings,
    pub provider: RefreshSettings,
    pub restart_backoff: Duration,
}

impl CrawlerSettings {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        let refresh = |batch_size| RefreshSettings {
            batch_size,
            max_lookahead: chrono::Duration::seconds(config.max_lookahead_secs),
            failure_backoff: chrono::Duration::seconds(config.failure_backoff_secs),
            empty_backoff: Duration::from_secs(config.empty_backoff_secs),
        };

        Self {
            artist: refresh(config.artist_batch_size),
            album: refresh(config.album_batch_size),
            provider: refresh(config.provider_batch_size),
            restart_backoff: Duration::from_secs(config.restart_backoff_secs),
        }
    }
}

/// Number of ids registered by [`Crawler::initialize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub artists: usize,
    pub albums: usize,
}

/// Run `task` until `cancel` fires, restarting it after `restart_backoff`
/// whenever it returns
pub async fn supervise<F, Fut, E>(
    name: &str,
    restart_backoff: Duration,
    cancel: &CancellationToken,
    mut task: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    loop {
        match task().await {
            Ok(()) if cancel.is_cancelled() => break,
            Ok(()) => warn!(task = name, "Background loop exited, restarting"),
            Err(e) => error!(task = name, error = %e, "Background loop failed, restarting"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(restart_backoff) => {}
        }
    }

    info!(task = name, "Background loop stopped");
}

/// Run sweeps every `interval` until cancelled
pub async fn run_invalidation_loop(
    sweep: &InvalidationSweep,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), SweepError> {
    loop {
        if let SweepOutcome::Completed { purged } = sweep.run().await? {
            info!(count = purged.len(), "Periodic invalidation done");
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

pub struct Crawler {
    aggregator: Arc<Aggregator>,
    settings: CrawlerSettings,
}

impl Crawler {
    pub fn new(aggregator: Arc<Aggregator>, settings: CrawlerSettings) -> Self {
        Self { aggregator, settings }
    }

    /// Every refresh target with its batch settings
    fn targets(&self) -> Vec<(Arc<dyn CacheRefresh>, RefreshSettings)> {
        let mut targets: Vec<(Arc<dyn CacheRefresh>, RefreshSettings)> = vec![
            (Arc::new(ArtistRefresh(self.aggregator.clone())), self.settings.artist),
            (Arc::new(AlbumRefresh(self.aggregator.clone())), self.settings.album),
        ];

        targets.extend(
            self.aggregator
                .registry()
                .implementing::<dyn CacheRefresh>()
                .iter()
                .map(|target| (target.clone(), self.settings.provider)),
        );

        targets
    }

    /// Run every loop until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let mut loops = JoinSet::new();
        let restart_backoff = self.settings.restart_backoff;

        for (target, settings) in self.targets() {
            let registry = self.aggregator.registry().clone();
            let cancel = cancel.clone();

            loops.spawn(async move {
                let name = format!("refresh:{}", target.cache_name());
                info!(task = %name, batch_size = settings.batch_size, "Starting refresh loop");

                let (registry, target, settings, token) = (&registry, &target, &settings, &cancel);
                supervise(&name, restart_backoff, &cancel, || async move {
                    registry.init_all().await?;
                    run_refresh_loop(target.as_ref(), settings, token).await
                })
                .await;
            });
        }

        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Crawler task panicked");
            }
        }
    }

    /// Cold start: replace both durable composite caches with every known id,
    /// seeded as already stale so the refresh loops pick them up
    pub async fn initialize(&self) -> Result<SeedReport, AggregateError> {
        let registry = self.aggregator.registry();

        let artist_ids = registry.first::<dyn ArtistIdList>()?.all_artist_ids().await?;
        let album_ids = registry
            .first::<dyn ReleaseGroupIdList>()?
            .all_release_group_ids()
            .await?;

        let report = SeedReport {
            artists: artist_ids.len(),
            albums: album_ids.len(),
        };

        let artists: Cache<Artist, dyn DurableTier> = Cache::new(self.aggregator.artist_durable());
        artists.clear().await?;
        artists.seed(artist_ids).await?;

        let albums: Cache<ReleaseGroup, dyn DurableTier> = Cache::new(self.aggregator.album_durable());
        albums.clear().await?;
        albums.seed(album_ids).await?;

        info!(artists = report.artists, albums = report.albums, "Durable caches seeded");
        Ok(report)
    }
}

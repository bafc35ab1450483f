//! Service assembly shared by the server and the crawler binaries

use anyhow::Context;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use crate::aggregator::{Aggregator, AggregatorSettings, DurableTiers};
use crate::cache::{CacheTier, DurableTier, MemoryTier, SqliteTier};
use crate::config::{RateLimitBackend, ServiceConfig};
use crate::crawler::{EdgePurger, InvalidationSweep};
use crate::http::HttpProvider;
use crate::limit::{
    CounterStore, CountingRateLimiter, MemoryCounterStore, NullRateLimiter, RateLimiter,
    SqliteCounterStore,
};
use crate::providers::{FanArtTvProvider, MusicBrainzDbProvider, TheAudioDbProvider, WikipediaProvider};
use crate::registry::Registry;

/// Which binary is assembling the services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Serves requests from the fast tier and runs the periodic sweep
    Server,
    /// Refreshes durable entries only; gets a fast tier that stores nothing,
    /// so nothing it builds can outlive an invalidation it never sees
    Crawler,
}

impl ProcessRole {
    fn fast_capacity(self, config: &ServiceConfig) -> usize {
        match self {
            ProcessRole::Server => config.cache.fast_capacity,
            ProcessRole::Crawler => 0,
        }
    }
}

/// Every long-lived component, built once per process
pub struct Services {
    pub registry: Arc<Registry>,
    pub aggregator: Arc<Aggregator>,
    pub sweep: Arc<InvalidationSweep>,
}

/// Opens one durable table
async fn durable(pool: &SqlitePool, table: &str) -> anyhow::Result<Arc<SqliteTier>> {
    let tier = SqliteTier::open(pool.clone(), table)
        .await
        .with_context(|| format!("Failed to open cache table {}", table))?;
    Ok(Arc::new(tier))
}

/// Limiter factory for the configured backend; limiters are keyed by provider name
fn limiter_factory(config: &ServiceConfig, pool: &SqlitePool) -> impl Fn(&str) -> Arc<dyn RateLimiter> {
    let settings = config.rate_limit.clone();
    let store: Option<Arc<dyn CounterStore>> = match settings.backend {
        RateLimitBackend::None => None,
        RateLimitBackend::Memory => Some(Arc::new(MemoryCounterStore::new())),
        RateLimitBackend::Sqlite => Some(Arc::new(SqliteCounterStore::new(pool.clone()))),
    };

    move |name: &str| -> Arc<dyn RateLimiter> {
        match &store {
            None => Arc::new(NullRateLimiter),
            Some(store) => Arc::new(CountingRateLimiter::new(
                name,
                settings.queue_size,
                chrono::Duration::milliseconds(settings.time_delta_ms),
                store.clone(),
            )),
        }
    }
}

pub async fn build_services(config: &ServiceConfig, role: ProcessRole) -> anyhow::Result<Services> {
    let pool = mdagg_common::db::init_database(&config.cache.database_path)
        .await
        .context("Failed to open cache database")?;

    let fast: Arc<dyn CacheTier> = Arc::new(MemoryTier::new(role.fast_capacity(config)));
    let artists: Arc<dyn DurableTier> = durable(&pool, "artist").await?;
    let albums: Arc<dyn DurableTier> = durable(&pool, "album").await?;
    let wikipedia: Arc<dyn DurableTier> = durable(&pool, "wikipedia").await?;
    let fanart: Arc<dyn DurableTier> = durable(&pool, "fanart").await?;
    let theaudiodb: Arc<dyn DurableTier> = durable(&pool, "theaudiodb").await?;
    let meta: Arc<dyn CacheTier> = durable(&pool, "meta").await?;

    let limiter = limiter_factory(config, &pool);
    let http = |name: &str| HttpProvider::new(name, config.providers.http_settings(), limiter(name));
    let ttl = &config.ttl;
    let providers = &config.providers;

    let registry = Registry::builder()
        .register(MusicBrainzDbProvider::new(
            &providers.musicbrainz_db_url,
            providers.musicbrainz_max_connections,
            providers.musicbrainz_timeout(),
        ))
        .register(WikipediaProvider::new(
            http("wikipedia"),
            &providers.wikidata_api_url,
            wikipedia,
            ttl.policy(ttl.overview),
        ))
        .register(FanArtTvProvider::new(
            http("fanart"),
            &providers.fanart_key,
            &providers.fanart_base_url,
            fanart,
            ttl.policy(ttl.fanart),
            chrono::Duration::seconds(config.crawler.fanart_lag_secs),
        ))
        .register(TheAudioDbProvider::new(
            http("theaudiodb"),
            &providers.theaudiodb_key,
            &providers.theaudiodb_base_url,
            theaudiodb,
            ttl.policy(ttl.theaudiodb),
        ))
        .build();
    let registry = Arc::new(registry);

    let aggregator = Arc::new(Aggregator::new(
        registry.clone(),
        fast.clone(),
        DurableTiers {
            artists: artists.clone(),
            albums: albums.clone(),
        },
        AggregatorSettings {
            artist_ttl: ttl.artist(),
            album_ttl: ttl.album(),
            error_ttl: ttl.provider_error(),
        },
    ));

    let purger = EdgePurger::new(config.edge_cache.clone(), config.providers.http_settings());
    if !purger.enabled() {
        info!("Edge cache purging disabled (no zone configured)");
    }

    let sweep = Arc::new(InvalidationSweep::new(
        registry.clone(),
        meta,
        fast,
        DurableTiers { artists, albums },
        purger,
        config.edge_cache.public_base(),
        chrono::Duration::seconds(config.crawler.lock_ttl_secs),
    ));

    info!(
        ?role,
        providers = registry.providers().len(),
        backend = ?config.rate_limit.backend,
        "Services initialized"
    );

    Ok(Services {
        registry,
        aggregator,
        sweep,
    })
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

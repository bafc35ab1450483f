//! mdagg service library - music metadata aggregation and caching engine
//!
//! Providers declare capabilities into a [`registry::Registry`]; the
//! [`aggregator::Aggregator`] merges them into composite artists and release
//! groups behind a dual-tier cache, and the [`crawler`] keeps the durable tier
//! fresh in the background.

use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod capabilities;
pub mod config;
pub mod crawler;
pub mod error;
pub mod http;
pub mod limit;
pub mod models;
pub mod providers;
pub mod registry;
pub mod services;
pub mod stats;

use aggregator::Aggregator;
use crawler::InvalidationSweep;
use registry::Registry;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub sweep: Arc<InvalidationSweep>,
    pub registry: Arc<Registry>,
    /// Upper bound for the edge cache lifetime of a response, in seconds
    pub edge_ttl: i64,
    pub startup_time: Instant,
}

impl AppState {
    pub fn new(services: &services::Services, edge_ttl: i64) -> Self {
        Self {
            aggregator: services.aggregator.clone(),
            sweep: services.sweep.clone(),
            registry: services.registry.clone(),
            edge_ttl,
            startup_time: Instant::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::artist_routes())
        .merge(api::album_routes())
        .merge(api::search_routes())
        .merge(api::invalidate_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

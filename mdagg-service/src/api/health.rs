//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::stats::StatsSnapshot;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    /// Outcome counters, for HTTP providers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub providers: Vec<ProviderHealth>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let providers = state
        .registry
        .providers()
        .iter()
        .map(|provider| ProviderHealth {
            name: provider.name().to_string(),
            stats: provider.stats(),
        })
        .collect();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "mdagg".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.startup_time.elapsed().as_secs(),
        providers,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

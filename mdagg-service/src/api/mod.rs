//! HTTP API handlers

pub mod album;
pub mod artist;
pub mod health;
pub mod invalidate;
pub mod search;

pub use album::album_routes;
pub use artist::artist_routes;
pub use health::health_routes;
pub use invalidate::invalidate_routes;
pub use search::search_routes;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use mdagg_common::time;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;

/// Normalized MBID, or 400
pub fn parse_mbid(raw: &str) -> Result<String, ApiError> {
    Uuid::parse_str(raw)
        .map(|id| id.hyphenated().to_string())
        .map_err(|_| ApiError::BadRequest(format!("Invalid MBID: {}", raw)))
}

/// `s-maxage` for a composite expiring at `expiry`, capped at `max_secs`
pub fn edge_max_age(expiry: DateTime<Utc>, max_secs: i64) -> i64 {
    (expiry - time::now()).num_seconds().clamp(0, max_secs.max(0))
}

/// JSON body with edge cache headers; browsers always revalidate
pub fn cached_json<T: Serialize>(body: T, expiry: DateTime<Utc>, max_secs: i64) -> Response {
    let cache_control = format!(
        "public, s-maxage={}, max-age=0",
        edge_max_age(expiry, max_secs)
    );
    ([(header::CACHE_CONTROL, cache_control)], Json(body)).into_response()
}

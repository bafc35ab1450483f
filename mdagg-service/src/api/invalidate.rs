//! On-demand invalidation sweep

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::crawler::SweepOutcome;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    /// Public URLs of the expired composites
    pub purged: Vec<String>,
}

/// POST /invalidate
///
/// Runs one sweep synchronously. 409 if another sweep holds the lock.
pub async fn invalidate(State(state): State<AppState>) -> ApiResult<Json<InvalidateResponse>> {
    match state.sweep.run().await? {
        SweepOutcome::Completed { purged } => Ok(Json(InvalidateResponse { purged })),
        SweepOutcome::AlreadyRunning => Err(ApiError::Conflict(
            "An invalidation sweep is already running".into(),
        )),
    }
}

pub fn invalidate_routes() -> Router<AppState> {
    Router::new().route("/invalidate", post(invalidate))
}

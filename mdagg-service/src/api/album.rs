//! Album endpoint

use axum::{
    extract::{Path, State},
    response::Response,
    routing::get,
    Router,
};

use super::{cached_json, parse_mbid};
use crate::error::ApiResult;
use crate::AppState;

/// GET /album/:mbid
///
/// Composite release group with every credited artist embedded.
pub async fn get_album(
    State(state): State<AppState>,
    Path(mbid): Path<String>,
) -> ApiResult<Response> {
    let id = parse_mbid(&mbid)?;
    let album = state.aggregator.release_group(&id).await?;

    Ok(cached_json(album.value, album.expiry, state.edge_ttl))
}

pub fn album_routes() -> Router<AppState> {
    Router::new().route("/album/:mbid", get(get_album))
}

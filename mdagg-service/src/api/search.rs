//! Name search endpoints
//!
//! `/search?type=..` dispatches to the per-type handlers.

use axum::{
    extract::{Query, State},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

use super::cached_json;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
    /// Album and track search: restrict to this artist name
    pub artist: Option<String>,
    /// Track search only: restrict to this album title
    pub album: Option<String>,
    pub limit: Option<usize>,
    /// Album search only: keep releases, media and tracks in the results
    #[serde(default, rename = "includeTracks")]
    pub include_tracks: bool,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl SearchQuery {
    /// Trimmed query text, or 400 when nothing is left
    fn text(&self) -> ApiResult<&str> {
        let text = self.query.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if text.is_empty() {
            return Err(ApiError::BadRequest("query must not be empty".into()));
        }
        Ok(text)
    }

    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    fn artist(&self) -> Option<&str> {
        non_blank(self.artist.as_deref())
    }

    fn album(&self) -> Option<&str> {
        non_blank(self.album.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// GET /search/artist?query=..&limit=..
pub async fn search_artist(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Response> {
    let artists = state
        .aggregator
        .search_artists(params.text()?, params.limit())
        .await?;

    Ok(cached_json(artists.value, artists.expiry, state.edge_ttl))
}

/// GET /search/album?query=..&artist=..&limit=..&includeTracks=..
///
/// Releases are left out unless `includeTracks=true`.
pub async fn search_album(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Response> {
    let mut albums = state
        .aggregator
        .search_release_groups(params.text()?, params.artist(), params.limit())
        .await?;

    if !params.include_tracks {
        for album in &mut albums.value {
            album.releases.clear();
        }
    }

    Ok(cached_json(albums.value, albums.expiry, state.edge_ttl))
}

/// GET /search/track?query=..&artist=..&album=..&limit=..
pub async fn search_track(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Response> {
    let tracks = state
        .aggregator
        .search_tracks(params.text()?, params.artist(), params.album(), params.limit())
        .await?;

    Ok(cached_json(tracks.value, tracks.expiry, state.edge_ttl))
}

/// GET /search?type=artist|album|track&..
pub async fn search_any(
    state: State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Response> {
    match params.kind.as_deref().map(str::trim) {
        None | Some("") => Err(ApiError::BadRequest("Type not provided".into())),
        Some("artist") => search_artist(state, Query(params)).await,
        Some("album") => search_album(state, Query(params)).await,
        Some("track") => search_track(state, Query(params)).await,
        Some(other) => Err(ApiError::BadRequest(format!("Unsupported search type {}", other))),
    }
}

pub fn search_routes() -> Router<AppState> {
    Router::new()
        .route("/search/artist", get(search_artist))
        .route("/search/album", get(search_album))
        .route("/search/track", get(search_track))
        .route("/search", get(search_any))
}

//! Artist endpoint
//!
//! `GET /artist/:mbid` returns the composite artist together with its album
//! list. The optional `primTypes`, `secTypes` and `releaseStatuses` query
//! parameters (comma separated, case-insensitive) filter the album list.

use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

use super::{cached_json, parse_mbid};
use crate::error::ApiResult;
use crate::models::{Artist, ReleaseGroupSummary};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumFilter {
    pub prim_types: Option<String>,
    pub sec_types: Option<String>,
    pub release_statuses: Option<String>,
}

fn split(list: &Option<String>) -> Option<Vec<String>> {
    list.as_ref().map(|list| {
        list.split(',')
            .map(|item| item.trim().to_lowercase())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

impl AlbumFilter {
    /// Albums whose primary type is listed, whose secondary types are all
    /// listed, and that have at least one listed release status
    pub fn apply(&self, albums: Vec<ReleaseGroupSummary>) -> Vec<ReleaseGroupSummary> {
        let primary = split(&self.prim_types);
        let secondary = split(&self.sec_types);
        let statuses = split(&self.release_statuses);
        let listed = |list: &[String], value: &str| list.iter().any(|item| *item == value.to_lowercase());

        albums
            .into_iter()
            .filter(|album| {
                primary.as_deref().map_or(true, |list| {
                    album.primary_type.as_deref().is_some_and(|t| listed(list, t))
                })
            })
            .filter(|album| {
                secondary.as_deref().map_or(true, |list| {
                    album.secondary_types.iter().all(|t| listed(list, t))
                })
            })
            .filter(|album| {
                statuses.as_deref().map_or(true, |list| {
                    album.release_statuses.iter().any(|s| listed(list, s))
                })
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct ArtistResponse {
    #[serde(flatten)]
    pub artist: Artist,
    pub albums: Vec<ReleaseGroupSummary>,
}

/// GET /artist/:mbid
pub async fn get_artist(
    State(state): State<AppState>,
    Path(mbid): Path<String>,
    Query(filter): Query<AlbumFilter>,
) -> ApiResult<Response> {
    let id = parse_mbid(&mbid)?;

    let (artist, albums) = tokio::join!(
        state.aggregator.artist(&id),
        state.aggregator.artist_release_groups(&id)
    );
    let artist = artist?;
    let albums = albums?;

    let expiry = artist.expiry.min(albums.expiry);
    let body = ArtistResponse {
        artist: artist.value,
        albums: filter.apply(albums.value),
    };

    Ok(cached_json(body, expiry, state.edge_ttl))
}

pub fn artist_routes() -> Router<AppState> {
    Router::new().route("/artist/:mbid", get(get_artist))
}

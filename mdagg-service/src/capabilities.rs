//! Capability contracts
//!
//! Each trait is one narrow thing a provider can do. A provider implements any
//! subset and declares which ones during registration (see [`crate::registry`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::DurableTier;
use crate::error::{AggregateError, ProviderError};
use crate::models::{
    ArtistRecord, Image, ImageKind, InvalidationResult, Link, Medium, Release,
    ReleaseGroupRecord, ReleaseGroupSummary, SearchHit, Timed, Track, TrackHit,
};

#[async_trait]
pub trait ArtistById: Send + Sync {
    /// Records for the ids that exist; unknown ids are simply absent
    async fn artists_by_id(&self, ids: &[String]) -> Result<Vec<ArtistRecord>, ProviderError>;
}

#[async_trait]
pub trait ArtistOverview: Send + Sync {
    /// Overview text from the first usable link
    async fn overview(&self, links: &[Link]) -> Result<Timed<String>, ProviderError>;
}

#[async_trait]
pub trait ArtistArtwork: Send + Sync {
    /// Categories this provider can ever return for an artist
    fn artist_image_kinds(&self) -> &'static [ImageKind];

    async fn artist_images(&self, id: &str) -> Result<Timed<Vec<Image>>, ProviderError>;
}

#[async_trait]
pub trait AlbumArtwork: Send + Sync {
    fn album_image_kinds(&self) -> &'static [ImageKind];

    async fn album_images(&self, id: &str) -> Result<Timed<Vec<Image>>, ProviderError>;
}

#[async_trait]
pub trait ReleaseGroupById: Send + Sync {
    async fn release_groups_by_id(
        &self,
        ids: &[String],
    ) -> Result<Vec<ReleaseGroupRecord>, ProviderError>;
}

#[async_trait]
pub trait ReleaseGroupArtists: Send + Sync {
    /// Every credited artist, in credit order
    async fn release_group_artist_ids(&self, id: &str) -> Result<Vec<String>, ProviderError>;
}

#[async_trait]
pub trait ReleasesByReleaseGroup: Send + Sync {
    /// Every release of the group; `media` may come back empty and `tracks` always does
    async fn releases_by_release_group(&self, id: &str) -> Result<Vec<Release>, ProviderError>;
}

#[async_trait]
pub trait MediaByRelease: Send + Sync {
    /// Media per release id, in position order; releases without media are absent
    async fn release_media(
        &self,
        release_ids: &[String],
    ) -> Result<HashMap<String, Vec<Medium>>, ProviderError>;
}

#[async_trait]
pub trait TracksByReleaseGroup: Send + Sync {
    /// Tracks of every release in the group, each tagged with its release id
    async fn release_group_tracks(&self, id: &str) -> Result<Vec<Track>, ProviderError>;
}

#[async_trait]
pub trait ArtistReleaseGroups: Send + Sync {
    async fn release_groups_by_artist(
        &self,
        artist_id: &str,
    ) -> Result<Vec<ReleaseGroupSummary>, ProviderError>;
}

#[async_trait]
pub trait ArtistNameSearch: Send + Sync {
    async fn search_artist_name(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ProviderError>;
}

#[async_trait]
pub trait AlbumNameSearch: Send + Sync {
    async fn search_album_name(
        &self,
        query: &str,
        artist_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ProviderError>;
}

#[async_trait]
pub trait TrackSearch: Send + Sync {
    async fn search_track(
        &self,
        query: &str,
        artist_name: Option<&str>,
        album_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TrackHit>, ProviderError>;
}

#[async_trait]
pub trait DataVintage: Send + Sync {
    /// Timestamp of the upstream data snapshot
    async fn data_vintage(&self) -> Result<DateTime<Utc>, ProviderError>;
}

/// Source of "what changed" signals for the invalidation sweep
#[async_trait]
pub trait InvalidateCache: Send + Sync {
    /// Stable name used to key the stored watermark
    fn watermark_name(&self) -> &str;

    /// Watermark describing the upstream state right now
    async fn current_watermark(&self) -> Result<DateTime<Utc>, ProviderError>;

    /// Entities changed between `since` and `until` (both watermarks)
    async fn changed_since(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<InvalidationResult, ProviderError>;
}

#[async_trait]
pub trait ArtistIdList: Send + Sync {
    async fn all_artist_ids(&self) -> Result<Vec<String>, ProviderError>;
}

#[async_trait]
pub trait ReleaseGroupIdList: Send + Sync {
    async fn all_release_group_ids(&self) -> Result<Vec<String>, ProviderError>;
}

/// A durable cache whose entries the crawler keeps fresh
#[async_trait]
pub trait CacheRefresh: Send + Sync {
    fn cache_name(&self) -> &str;

    fn durable(&self) -> Arc<dyn DurableTier>;

    /// Re-fetch one key ignoring freshness; returns the new expiry
    async fn refresh(&self, key: &str) -> Result<DateTime<Utc>, AggregateError>;
}

//! Metadata records served by the aggregation engine
//!
//! Records from the metadata database are "base" records. Composite records
//! embed a base record plus the results of non-essential sub-fetches.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A value together with the instant it stops being fresh
#[derive(Debug, Clone, PartialEq)]
pub struct Timed<T> {
    pub value: T,
    pub expiry: DateTime<Utc>,
}

impl<T> Timed<T> {
    pub fn new(value: T, expiry: DateTime<Utc>) -> Self {
        Self { value, expiry }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Timed<U> {
        Timed {
            value: f(self.value),
            expiry: self.expiry,
        }
    }
}

/// Community rating
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub count: u32,
    pub value: Option<f64>,
}

/// External link attached to an artist or release group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub target: String,
    /// Short site name derived from the URL, e.g. "wikipedia"
    #[serde(rename = "type")]
    pub link_type: String,
}

/// Image category; artwork providers are merged per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImageKind {
    Banner,
    Fanart,
    Logo,
    Poster,
    Cover,
    Disc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub cover_type: ImageKind,
    pub url: String,
}

impl Image {
    pub fn new(cover_type: ImageKind, url: impl Into<String>) -> Self {
        Self {
            cover_type,
            url: url.into(),
        }
    }
}

/// Artist as stored in the metadata database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistRecord {
    pub id: String,
    pub artist_name: String,
    pub sort_name: String,
    pub disambiguation: String,
    #[serde(rename = "type")]
    pub artist_type: String,
    pub status: String,
    pub links: Vec<Link>,
    pub rating: Rating,
}

/// Composite artist: base record plus overview text and merged artwork
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    #[serde(flatten)]
    pub record: ArtistRecord,
    pub overview: String,
    pub images: Vec<Image>,
}

impl Artist {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Release group as stored in the metadata database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseGroupRecord {
    pub id: String,
    pub title: String,
    pub disambiguation: String,
    #[serde(rename = "type")]
    pub primary_type: Option<String>,
    pub secondary_types: Vec<String>,
    pub release_date: Option<NaiveDate>,
    /// First credited artist
    pub artist_id: String,
    pub links: Vec<Link>,
    pub rating: Rating,
}

/// One medium (disc, side, file set) of a release
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medium {
    /// Empty when the database has no format for it
    pub format: String,
    pub name: String,
    pub position: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub recording_id: String,
    pub release_id: String,
    pub artist_id: String,
    pub track_name: String,
    pub duration_ms: Option<u32>,
    pub medium_number: u32,
    /// As printed, e.g. "A1"
    pub track_number: String,
    pub track_position: u32,
}

/// One release of a release group, with its media and tracks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: String,
    pub title: String,
    pub disambiguation: String,
    pub status: Option<String>,
    pub label: Vec<String>,
    pub country: Vec<String>,
    pub release_date: Option<NaiveDate>,
    pub media: Vec<Medium>,
    pub track_count: u32,
    pub tracks: Vec<Track>,
}

/// Composite release group: base record, artwork, releases, and every credited artist
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseGroup {
    #[serde(flatten)]
    pub record: ReleaseGroupRecord,
    pub images: Vec<Image>,
    /// Composites stored before releases were aggregated read back empty
    #[serde(default)]
    pub releases: Vec<Release>,
    pub artists: Vec<Artist>,
}

impl ReleaseGroup {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Entry in an artist's album list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseGroupSummary {
    pub id: String,
    pub title: String,
    pub disambiguation: String,
    #[serde(rename = "type")]
    pub primary_type: Option<String>,
    pub secondary_types: Vec<String>,
    pub release_statuses: Vec<String>,
    pub release_date: Option<NaiveDate>,
    pub rating: Rating,
}

/// Name search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// 0-100 match quality
    pub score: u32,
}

/// Track search result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackHit {
    pub track_name: String,
    pub duration_ms: Option<u32>,
    pub artist_name: String,
    pub artist_id: String,
    pub album_title: String,
    pub album_id: String,
    pub rating: Rating,
}

/// Entity ids whose cached composites must be treated as stale
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationResult {
    pub artists: BTreeSet<String>,
    pub albums: BTreeSet<String>,
}

impl InvalidationResult {
    pub fn union(&mut self, other: InvalidationResult) {
        self.artists.extend(other.artists);
        self.albums.extend(other.albums);
    }

    pub fn is_empty(&self) -> bool {
        self.artists.is_empty() && self.albums.is_empty()
    }

    pub fn len(&self) -> usize {
        self.artists.len() + self.albums.len()
    }
}

//! Shared test fixtures: scripted mock providers and an aggregator harness

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mdagg_common::time;
use mdagg_service::aggregator::{Aggregator, AggregatorSettings, DurableTiers};
use mdagg_service::cache::{CacheTier, DurableTier, MemoryTier};
use mdagg_service::capabilities::{
    AlbumArtwork, AlbumNameSearch, ArtistArtwork, ArtistById, ArtistIdList, ArtistNameSearch,
    ArtistOverview, ArtistReleaseGroups, InvalidateCache, MediaByRelease, ReleaseGroupArtists,
    ReleaseGroupById, ReleaseGroupIdList, ReleasesByReleaseGroup, TrackSearch,
    TracksByReleaseGroup,
};
use mdagg_service::config::EdgeCacheConfig;
use mdagg_service::crawler::{EdgePurger, InvalidationSweep};
use mdagg_service::error::ProviderError;
use mdagg_service::http::HttpSettings;
use mdagg_service::models::{
    ArtistRecord, Image, ImageKind, InvalidationResult, Link, Medium, Release,
    ReleaseGroupRecord, ReleaseGroupSummary, SearchHit, Timed, Track, TrackHit,
};
use mdagg_service::registry::{CapabilitySet, Provider, Registry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

pub const ARTIST_A: &str = "a74b1b7f-71a5-4011-9441-d0b5e4122711";
pub const ARTIST_B: &str = "b10bbbfc-cf9e-42e0-be17-e2c3e1d2600d";
pub const ALBUM_X: &str = "1dc4c347-a1db-32aa-b14f-bc9cc507b843";
pub const UNKNOWN: &str = "00000000-0000-0000-0000-000000000000";

pub fn settings() -> AggregatorSettings {
    AggregatorSettings {
        artist_ttl: Duration::hours(1),
        album_ttl: Duration::hours(2),
        error_ttl: Duration::minutes(5),
    }
}

/// `actual` is within a few seconds after `now + ttl` taken before the call
pub fn assert_expires_in(actual: DateTime<Utc>, before: DateTime<Utc>, ttl: Duration) {
    let expected = before + ttl;
    assert!(
        actual >= expected && actual <= expected + Duration::seconds(5),
        "expiry {} not within 5s after {}",
        actual,
        expected
    );
}

pub fn artist_record(id: &str, name: &str) -> ArtistRecord {
    ArtistRecord {
        id: id.to_string(),
        artist_name: name.to_string(),
        sort_name: name.to_string(),
        artist_type: "Group".to_string(),
        status: "active".to_string(),
        links: vec![Link {
            target: format!("https://en.wikipedia.org/wiki/{}", name),
            link_type: "wikipedia".to_string(),
        }],
        ..Default::default()
    }
}

pub fn album_record(id: &str, title: &str, artist_id: &str) -> ReleaseGroupRecord {
    ReleaseGroupRecord {
        id: id.to_string(),
        title: title.to_string(),
        primary_type: Some("Album".to_string()),
        artist_id: artist_id.to_string(),
        ..Default::default()
    }
}

/// Stands in for the metadata database
#[derive(Default)]
pub struct MockDb {
    pub artists: Mutex<HashMap<String, ArtistRecord>>,
    pub albums: Mutex<HashMap<String, ReleaseGroupRecord>>,
    pub credits: Mutex<HashMap<String, Vec<String>>>,
    pub artist_albums: Mutex<HashMap<String, Vec<ReleaseGroupSummary>>>,
    pub search_hits: Mutex<Vec<SearchHit>>,
    /// Releases per release group, returned without media or tracks
    pub releases: Mutex<HashMap<String, Vec<Release>>>,
    /// Media per release id
    pub media: Mutex<HashMap<String, Vec<Medium>>>,
    /// Tracks per release group
    pub tracks: Mutex<HashMap<String, Vec<Track>>>,
    pub track_hits: Mutex<Vec<TrackHit>>,
    pub release_error: Mutex<Option<ProviderError>>,
    pub track_error: Mutex<Option<ProviderError>>,
    /// Returned by every artist lookup when set
    pub artist_error: Mutex<Option<ProviderError>>,
    /// Returned by artist lookups for these ids only
    pub artist_errors: Mutex<HashMap<String, ProviderError>>,
    pub search_error: Mutex<Option<ProviderError>>,
    pub vintage: Mutex<DateTime<Utc>>,
    pub changed: Mutex<InvalidationResult>,
    pub changed_error: Mutex<Option<ProviderError>>,
    pub changed_delay: Mutex<std::time::Duration>,
    pub artist_calls: AtomicUsize,
    pub album_calls: AtomicUsize,
    pub artist_album_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub changed_calls: AtomicUsize,
    pub release_calls: AtomicUsize,
    pub media_calls: AtomicUsize,
    pub track_search_calls: AtomicUsize,
}

impl MockDb {
    pub fn new() -> Self {
        Self {
            vintage: Mutex::new(time::epoch()),
            ..Default::default()
        }
    }

    pub fn with_artist(self, id: &str, name: &str) -> Self {
        self.artists.lock().insert(id.to_string(), artist_record(id, name));
        self
    }

    pub fn with_album(self, id: &str, title: &str, artist_ids: &[&str]) -> Self {
        let first = artist_ids.first().copied().unwrap_or_default();
        self.albums.lock().insert(id.to_string(), album_record(id, title, first));
        self.credits
            .lock()
            .insert(id.to_string(), artist_ids.iter().map(|s| s.to_string()).collect());
        self
    }

    /// One release of `album_id` on a single CD with two tracks by `artist_id`
    pub fn with_release(self, album_id: &str, release_id: &str, artist_id: &str) -> Self {
        self.releases
            .lock()
            .entry(album_id.to_string())
            .or_default()
            .push(Release {
                id: release_id.to_string(),
                title: format!("Release {}", release_id),
                status: Some("Official".to_string()),
                country: vec!["United Kingdom".to_string()],
                track_count: 2,
                ..Default::default()
            });
        self.media.lock().insert(
            release_id.to_string(),
            vec![Medium {
                format: "CD".to_string(),
                name: String::new(),
                position: 1,
            }],
        );
        self.tracks
            .lock()
            .entry(album_id.to_string())
            .or_default()
            .extend((1..=2).map(|n| Track {
                id: format!("{}-t{}", release_id, n),
                recording_id: format!("rec-{}", n),
                release_id: release_id.to_string(),
                artist_id: artist_id.to_string(),
                track_name: format!("Song {}", n),
                duration_ms: Some(180_000),
                medium_number: 1,
                track_number: n.to_string(),
                track_position: n,
            }));
        self
    }

    pub fn calls(&self, counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockDb {
    fn name(&self) -> &str {
        "mockdb"
    }

    fn register_capabilities(self: Arc<Self>, capabilities: &mut CapabilitySet) {
        capabilities.add::<dyn ArtistById>(self.clone());
        capabilities.add::<dyn ArtistIdList>(self.clone());
        capabilities.add::<dyn ArtistNameSearch>(self.clone());
        capabilities.add::<dyn ArtistReleaseGroups>(self.clone());
        capabilities.add::<dyn ReleaseGroupById>(self.clone());
        capabilities.add::<dyn ReleaseGroupIdList>(self.clone());
        capabilities.add::<dyn ReleaseGroupArtists>(self.clone());
        capabilities.add::<dyn AlbumNameSearch>(self.clone());
        capabilities.add::<dyn ReleasesByReleaseGroup>(self.clone());
        capabilities.add::<dyn MediaByRelease>(self.clone());
        capabilities.add::<dyn TracksByReleaseGroup>(self.clone());
        capabilities.add::<dyn TrackSearch>(self.clone());
        capabilities.add::<dyn InvalidateCache>(self);
    }
}

#[async_trait]
impl ArtistById for MockDb {
    async fn artists_by_id(&self, ids: &[String]) -> Result<Vec<ArtistRecord>, ProviderError> {
        self.artist_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.artist_error.lock().clone() {
            return Err(e);
        }
        if let Some(e) = ids.iter().find_map(|id| self.artist_errors.lock().get(id).cloned()) {
            return Err(e);
        }
        let artists = self.artists.lock();
        Ok(ids.iter().filter_map(|id| artists.get(id).cloned()).collect())
    }
}

#[async_trait]
impl ArtistIdList for MockDb {
    async fn all_artist_ids(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.artists.lock().keys().cloned().collect())
    }
}

#[async_trait]
impl ArtistNameSearch for MockDb {
    async fn search_artist_name(&self, _query: &str, limit: usize) -> Result<Vec<SearchHit>, ProviderError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.search_error.lock().clone() {
            return Err(e);
        }
        Ok(self.search_hits.lock().iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl AlbumNameSearch for MockDb {
    async fn search_album_name(
        &self,
        query: &str,
        _artist_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        self.search_artist_name(query, limit).await
    }
}

#[async_trait]
impl ArtistReleaseGroups for MockDb {
    async fn release_groups_by_artist(&self, artist_id: &str) -> Result<Vec<ReleaseGroupSummary>, ProviderError> {
        self.artist_album_calls.fetch_add(1, Ordering::SeqCst);
        self.artist_albums
            .lock()
            .get(artist_id)
            .cloned()
            .ok_or(ProviderError::NotFound)
    }
}

#[async_trait]
impl ReleaseGroupById for MockDb {
    async fn release_groups_by_id(&self, ids: &[String]) -> Result<Vec<ReleaseGroupRecord>, ProviderError> {
        self.album_calls.fetch_add(1, Ordering::SeqCst);
        let albums = self.albums.lock();
        Ok(ids.iter().filter_map(|id| albums.get(id).cloned()).collect())
    }
}

#[async_trait]
impl ReleaseGroupIdList for MockDb {
    async fn all_release_group_ids(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.albums.lock().keys().cloned().collect())
    }
}

#[async_trait]
impl ReleaseGroupArtists for MockDb {
    async fn release_group_artist_ids(&self, id: &str) -> Result<Vec<String>, ProviderError> {
        Ok(self.credits.lock().get(id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ReleasesByReleaseGroup for MockDb {
    async fn releases_by_release_group(&self, id: &str) -> Result<Vec<Release>, ProviderError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.release_error.lock().clone() {
            return Err(e);
        }
        Ok(self.releases.lock().get(id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl MediaByRelease for MockDb {
    async fn release_media(
        &self,
        release_ids: &[String],
    ) -> Result<HashMap<String, Vec<Medium>>, ProviderError> {
        self.media_calls.fetch_add(1, Ordering::SeqCst);
        let media = self.media.lock();
        Ok(release_ids
            .iter()
            .filter_map(|id| media.get(id).map(|found| (id.clone(), found.clone())))
            .collect())
    }
}

#[async_trait]
impl TracksByReleaseGroup for MockDb {
    async fn release_group_tracks(&self, id: &str) -> Result<Vec<Track>, ProviderError> {
        if let Some(e) = self.track_error.lock().clone() {
            return Err(e);
        }
        Ok(self.tracks.lock().get(id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl TrackSearch for MockDb {
    async fn search_track(
        &self,
        _query: &str,
        _artist_name: Option<&str>,
        _album_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TrackHit>, ProviderError> {
        self.track_search_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.search_error.lock().clone() {
            return Err(e);
        }
        Ok(self.track_hits.lock().iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl InvalidateCache for MockDb {
    fn watermark_name(&self) -> &str {
        "mockdb"
    }

    async fn current_watermark(&self) -> Result<DateTime<Utc>, ProviderError> {
        Ok(*self.vintage.lock())
    }

    async fn changed_since(
        &self,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> Result<InvalidationResult, ProviderError> {
        self.changed_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.changed_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.changed_error.lock().clone() {
            return Err(e);
        }
        Ok(self.changed.lock().clone())
    }
}

/// Overview text with a scripted outcome
pub struct MockOverview {
    pub result: Mutex<Result<(String, Duration), ProviderError>>,
    pub calls: AtomicUsize,
    /// Completes only after this is notified
    pub wait_for: Option<Arc<Notify>>,
}

impl MockOverview {
    pub fn new(text: &str, ttl: Duration) -> Self {
        Self {
            result: Mutex::new(Ok((text.to_string(), ttl))),
            calls: AtomicUsize::new(0),
            wait_for: None,
        }
    }

    pub fn set(&self, result: Result<(String, Duration), ProviderError>) {
        *self.result.lock() = result;
    }
}

#[async_trait]
impl Provider for MockOverview {
    fn name(&self) -> &str {
        "mockoverview"
    }

    fn register_capabilities(self: Arc<Self>, capabilities: &mut CapabilitySet) {
        capabilities.add::<dyn ArtistOverview>(self);
    }
}

#[async_trait]
impl ArtistOverview for MockOverview {
    async fn overview(&self, _links: &[Link]) -> Result<Timed<String>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(signal) = &self.wait_for {
            signal.notified().await;
        }
        let result = self.result.lock().clone();
        result.map(|(text, ttl)| Timed::new(text, time::expiry_after(ttl)))
    }
}

/// Artist and album artwork with a scripted outcome
pub struct MockArtwork {
    pub name: &'static str,
    pub kinds: &'static [ImageKind],
    pub result: Mutex<Result<(Vec<Image>, Duration), ProviderError>>,
    pub calls: AtomicUsize,
    /// Notified as soon as a fetch starts
    pub started: Option<Arc<Notify>>,
}

impl MockArtwork {
    pub fn new(name: &'static str, kinds: &'static [ImageKind], images: Vec<Image>, ttl: Duration) -> Self {
        Self {
            name,
            kinds,
            result: Mutex::new(Ok((images, ttl))),
            calls: AtomicUsize::new(0),
            started: None,
        }
    }

    pub fn set(&self, result: Result<(Vec<Image>, Duration), ProviderError>) {
        *self.result.lock() = result;
    }

    async fn fetch(&self) -> Result<Timed<Vec<Image>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(signal) = &self.started {
            signal.notify_one();
        }
        let result = self.result.lock().clone();
        result.map(|(images, ttl)| Timed::new(images, time::expiry_after(ttl)))
    }
}

#[async_trait]
impl Provider for MockArtwork {
    fn name(&self) -> &str {
        self.name
    }

    fn register_capabilities(self: Arc<Self>, capabilities: &mut CapabilitySet) {
        capabilities.add::<dyn ArtistArtwork>(self.clone());
        capabilities.add::<dyn AlbumArtwork>(self);
    }
}

#[async_trait]
impl ArtistArtwork for MockArtwork {
    fn artist_image_kinds(&self) -> &'static [ImageKind] {
        self.kinds
    }

    async fn artist_images(&self, _id: &str) -> Result<Timed<Vec<Image>>, ProviderError> {
        self.fetch().await
    }
}

#[async_trait]
impl AlbumArtwork for MockArtwork {
    fn album_image_kinds(&self) -> &'static [ImageKind] {
        self.kinds
    }

    async fn album_images(&self, _id: &str) -> Result<Timed<Vec<Image>>, ProviderError> {
        self.fetch().await
    }
}

pub const FANART_KINDS: &[ImageKind] = &[ImageKind::Banner, ImageKind::Logo, ImageKind::Cover];
pub const AUDIODB_KINDS: &[ImageKind] = &[ImageKind::Banner, ImageKind::Fanart];

/// Aggregator over in-memory tiers
pub struct Harness {
    pub registry: Arc<Registry>,
    pub aggregator: Arc<Aggregator>,
    pub fast: Arc<MemoryTier>,
    pub artists: Arc<MemoryTier>,
    pub albums: Arc<MemoryTier>,
    pub meta: Arc<MemoryTier>,
}

impl Harness {
    pub fn new(registry: Registry) -> Self {
        let registry = Arc::new(registry);
        let fast = Arc::new(MemoryTier::new(1000));
        let artists = Arc::new(MemoryTier::new(1000));
        let albums = Arc::new(MemoryTier::new(1000));

        let aggregator = Arc::new(Aggregator::new(
            registry.clone(),
            fast.clone(),
            DurableTiers {
                artists: artists.clone(),
                albums: albums.clone(),
            },
            settings(),
        ));

        Self {
            registry,
            aggregator,
            fast,
            artists,
            albums,
            meta: Arc::new(MemoryTier::new(100)),
        }
    }

    /// Sweep over the harness tiers with purging disabled
    pub fn sweep(&self) -> InvalidationSweep {
        self.sweep_with(EdgePurger::new(EdgeCacheConfig::default(), HttpSettings::default()))
    }

    pub fn sweep_with(&self, purger: EdgePurger) -> InvalidationSweep {
        InvalidationSweep::new(
            self.registry.clone(),
            self.meta.clone() as Arc<dyn CacheTier>,
            self.fast.clone() as Arc<dyn CacheTier>,
            DurableTiers {
                artists: self.artists.clone() as Arc<dyn DurableTier>,
                albums: self.albums.clone() as Arc<dyn DurableTier>,
            },
            purger,
            "https://api.example.org",
            Duration::minutes(5),
        )
    }
}

/// Mocks wired into a registry in the usual preference order
pub struct Mocks {
    pub db: Arc<MockDb>,
    pub overview: Arc<MockOverview>,
    pub fanart: Arc<MockArtwork>,
    pub audiodb: Arc<MockArtwork>,
}

impl Mocks {
    pub fn new(db: MockDb) -> Self {
        Self {
            db: Arc::new(db),
            overview: Arc::new(MockOverview::new("Overview text", Duration::hours(3))),
            fanart: Arc::new(MockArtwork::new(
                "fanart",
                FANART_KINDS,
                vec![Image::new(ImageKind::Logo, "https://fanart/logo.png")],
                Duration::hours(3),
            )),
            audiodb: Arc::new(MockArtwork::new(
                "theaudiodb",
                AUDIODB_KINDS,
                vec![Image::new(ImageKind::Fanart, "https://audiodb/fanart.jpg")],
                Duration::hours(3),
            )),
        }
    }

    pub fn registry(&self) -> Registry {
        let mut builder = Registry::builder();
        builder.register_arc(self.db.clone());
        builder.register_arc(self.overview.clone());
        builder.register_arc(self.fanart.clone());
        builder.register_arc(self.audiodb.clone());
        builder.build()
    }

    pub fn harness(&self) -> Harness {
        Harness::new(self.registry())
    }
}

/// Serve `router` on an ephemeral local port; returns the base URL
pub async fn serve(router: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

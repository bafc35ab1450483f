//! Entity aggregator
//!
//! Builds composite artists and release groups from every registered
//! capability and serves them through the fast tier, reading through to the
//! durable tier on a miss.
//!
//! **Flow per entity:**
//! 1. Fresh fast-tier entry: return it, no upstream calls
//! 2. Fresh durable entry: promote to the fast tier and return it
//! 3. Otherwise fetch the base record (essential), then start the overview
//!    sub-fetch (artists) or the releases sub-fetch (release groups), then the
//!    artwork sub-fetches, and await them in that order
//! 4. Merge, take the minimum expiry over every contribution, write back
//!
//! Non-essential failures never surface: the previous value of the field (or
//! an empty one) is used and the composite expiry drops to `now + error_ttl`.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use mdagg_common::time;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{cached_call, Cache, CachePolicy, CacheTier, DurableTier};
use crate::capabilities::{
    AlbumArtwork, AlbumNameSearch, ArtistArtwork, ArtistById, ArtistNameSearch, ArtistOverview,
    ArtistReleaseGroups, MediaByRelease, ReleaseGroupArtists, ReleaseGroupById,
    ReleasesByReleaseGroup, TrackSearch, TracksByReleaseGroup,
};
use crate::error::{AggregateError, ProviderError};
use crate::models::{
    Artist, ArtistRecord, Image, ImageKind, Release, ReleaseGroup, ReleaseGroupRecord,
    ReleaseGroupSummary, SearchHit, Timed, Track, TrackHit,
};
use crate::registry::{capability_name, Registry};

#[derive(Debug, Clone, Copy)]
pub struct AggregatorSettings {
    pub artist_ttl: Duration,
    pub album_ttl: Duration,
    /// Contribution of a sub-fetch that failed and fell back
    pub error_ttl: Duration,
}

/// Durable tiers the aggregator writes composites through to
pub struct DurableTiers {
    pub artists: Arc<dyn DurableTier>,
    pub albums: Arc<dyn DurableTier>,
}

/// Fast and durable views of one composite type
struct Tiers<V> {
    entity: &'static str,
    fast: Cache<V>,
    durable: Cache<V, dyn DurableTier>,
}

enum Lookup<V> {
    Fresh(Timed<V>),
    /// Nothing fresh; the last known value if any
    Miss(Option<V>),
}

impl<V> Tiers<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn new(entity: &'static str, fast: Arc<dyn CacheTier>, durable: Arc<dyn DurableTier>) -> Self {
        Self {
            entity,
            fast: Cache::with_prefix(fast, format!("{}:", entity)),
            durable: Cache::new(durable),
        }
    }

    async fn lookup(&self, id: &str) -> Lookup<V> {
        let fast = match self.fast.get(id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(entity = self.entity, mbid = %id, error = %e, "Fast tier read failed");
                None
            }
        };

        if let Some(entry) = fast.as_ref().filter(|e| e.is_fresh()) {
            return Lookup::Fresh(Timed::new(entry.value.clone(), entry.expires_at()));
        }

        match self.durable.get(id).await {
            Ok(Some(entry)) if entry.is_fresh() => {
                let expiry = entry.expires_at();
                if let Err(e) = self.fast.set_until(id, &entry.value, expiry).await {
                    warn!(entity = self.entity, mbid = %id, error = %e, "Fast tier promotion failed");
                }
                Lookup::Fresh(Timed::new(entry.value, expiry))
            }
            Ok(Some(entry)) => Lookup::Miss(Some(entry.value)),
            Ok(None) => Lookup::Miss(fast.map(|e| e.value)),
            Err(e) => {
                warn!(entity = self.entity, mbid = %id, error = %e, "Durable tier read failed");
                Lookup::Miss(fast.map(|e| e.value))
            }
        }
    }

    /// Last durable value regardless of freshness
    async fn previous(&self, id: &str) -> Result<Option<V>, AggregateError> {
        Ok(self.durable.get(id).await?.map(|entry| entry.value))
    }

    async fn store(&self, id: &str, composite: &Timed<V>) -> mdagg_common::Result<()> {
        self.fast.set_until(id, &composite.value, composite.expiry).await?;
        self.durable.set_until(id, &composite.value, composite.expiry).await
    }

    async fn forget(&self, id: &str) -> mdagg_common::Result<()> {
        self.fast.delete(id).await?;
        self.durable.delete(id).await?;
        Ok(())
    }

    /// Request-path write-back; the composite is still served if it fails
    async fn store_logged(&self, id: &str, composite: &Timed<V>) {
        if let Err(e) = self.store(id, composite).await {
            warn!(entity = self.entity, mbid = %id, error = %e, "Composite write-back failed");
        }
    }

    async fn forget_logged(&self, id: &str) {
        if let Err(e) = self.forget(id).await {
            warn!(entity = self.entity, mbid = %id, error = %e, "Composite delete failed");
        }
    }
}

/// A spawned sub-fetch, aborted if dropped before it is awaited
struct SubFetch<T> {
    handle: JoinHandle<Result<T, ProviderError>>,
}

impl<T: Send + 'static> SubFetch<T> {
    fn spawn<F>(fetch: F) -> Self
    where
        F: Future<Output = Result<T, ProviderError>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(fetch),
        }
    }

    async fn join(mut self) -> Result<T, ProviderError> {
        match (&mut self.handle).await {
            Ok(result) => result,
            Err(e) => Err(ProviderError::Transport(format!("sub-fetch task failed: {}", e))),
        }
    }
}

impl<T> Drop for SubFetch<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct ArtworkJob {
    provider: usize,
    kinds: &'static [ImageKind],
    fetch: SubFetch<Timed<Vec<Image>>>,
}

/// Running minimum over sub-fetch expiries
#[derive(Debug, Clone, Copy)]
struct MinExpiry(Option<DateTime<Utc>>);

impl MinExpiry {
    fn fold(&mut self, expiry: DateTime<Utc>) {
        self.0 = Some(self.0.map_or(expiry, |current| current.min(expiry)));
    }

    fn or(self, default: DateTime<Utc>) -> DateTime<Utc> {
        self.0.unwrap_or(default)
    }
}

/// Merge artwork across providers, in registry order
///
/// A provider only adds categories no earlier provider supplied. Once every
/// category a pending provider can return is covered, it is aborted. A failed
/// provider's categories are filled from `previous`.
async fn combine_images(
    jobs: Vec<ArtworkJob>,
    previous: &[Image],
    error_expiry: DateTime<Utc>,
    expiry: &mut MinExpiry,
) -> Vec<Image> {
    let mut images: Vec<Image> = Vec::new();
    let mut covered: HashSet<ImageKind> = HashSet::new();

    for job in jobs {
        if job.kinds.iter().all(|kind| covered.contains(kind)) {
            debug!(provider = job.provider, "Artwork already covered, cancelling");
            continue;
        }

        match job.fetch.join().await {
            Ok(timed) => {
                expiry.fold(timed.expiry);
                let added: Vec<Image> = timed
                    .value
                    .into_iter()
                    .filter(|image| !covered.contains(&image.cover_type))
                    .collect();
                covered.extend(added.iter().map(|image| image.cover_type));
                images.extend(added);
            }
            Err(ProviderError::NotFound) => {}
            Err(e) => {
                warn!(provider = job.provider, error = %e, "Artwork provider failed, using previous images");
                expiry.fold(error_expiry);
                let fallback: Vec<Image> = previous
                    .iter()
                    .filter(|image| job.kinds.contains(&image.cover_type))
                    .filter(|image| !covered.contains(&image.cover_type))
                    .cloned()
                    .collect();
                covered.extend(fallback.iter().map(|image| image.cover_type));
                images.extend(fallback);
            }
        }
    }

    images
}

/// Releases of a group with media filled in and tracks attached
///
/// Tracks are fetched concurrently with the release list. A release whose
/// provider left `media` empty gets it from `media` when one is registered.
async fn fetch_releases(
    id: String,
    releases: Arc<dyn ReleasesByReleaseGroup>,
    media: Option<Arc<dyn MediaByRelease>>,
    tracks: Option<Arc<dyn TracksByReleaseGroup>>,
) -> Result<Vec<Release>, ProviderError> {
    let track_fetch = tracks.map(|provider| {
        let id = id.clone();
        SubFetch::spawn(async move { provider.release_group_tracks(&id).await })
    });

    let mut found = match releases.releases_by_release_group(&id).await {
        Ok(found) => found,
        Err(ProviderError::NotFound) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let bare: Vec<String> = found
        .iter()
        .filter(|release| release.media.is_empty())
        .map(|release| release.id.clone())
        .collect();
    if let Some(media) = media.filter(|_| !bare.is_empty()) {
        let mut by_release = media.release_media(&bare).await?;
        for release in found.iter_mut().filter(|release| release.media.is_empty()) {
            release.media = by_release.remove(&release.id).unwrap_or_default();
        }
    }

    if let Some(fetch) = track_fetch {
        let tracks = match fetch.join().await {
            Ok(tracks) => tracks,
            Err(ProviderError::NotFound) => Vec::new(),
            Err(e) => return Err(e),
        };
        attach_tracks(&mut found, tracks);
    }

    Ok(found)
}

/// Distribute tracks to their releases; tracks of unknown releases are dropped
fn attach_tracks(releases: &mut [Release], tracks: Vec<Track>) {
    let mut by_release: HashMap<String, Vec<Track>> = HashMap::new();
    for track in tracks {
        by_release.entry(track.release_id.clone()).or_default().push(track);
    }

    for release in releases {
        let mut tracks = by_release.remove(&release.id).unwrap_or_default();
        tracks.sort_by_key(|track| (track.medium_number, track.track_position));
        release.tracks = tracks;
    }
}

/// Base record from an essential provider
fn essential<R>(
    result: Result<Vec<R>, ProviderError>,
    entity: &'static str,
    id: &str,
) -> Result<R, AggregateError> {
    let not_found = || AggregateError::NotFound {
        entity,
        id: id.to_string(),
    };

    match result {
        Ok(records) => records.into_iter().next().ok_or_else(not_found),
        Err(ProviderError::NotFound) => Err(not_found()),
        Err(e) => Err(AggregateError::Unavailable(e)),
    }
}

pub struct Aggregator {
    registry: Arc<Registry>,
    settings: AggregatorSettings,
    artists: Tiers<Artist>,
    albums: Tiers<ReleaseGroup>,
    artist_albums: Cache<Vec<ReleaseGroupSummary>>,
}

impl Aggregator {
    pub fn new(
        registry: Arc<Registry>,
        fast: Arc<dyn CacheTier>,
        durable: DurableTiers,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            registry,
            settings,
            artists: Tiers::new("artist", fast.clone(), durable.artists),
            albums: Tiers::new("album", fast.clone(), durable.albums),
            artist_albums: Cache::with_prefix(fast, "artist_albums:"),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn artist_durable(&self) -> Arc<dyn DurableTier> {
        self.artists.durable.tier().clone()
    }

    pub fn album_durable(&self) -> Arc<dyn DurableTier> {
        self.albums.durable.tier().clone()
    }

    fn error_expiry(&self) -> DateTime<Utc> {
        time::expiry_after(self.settings.error_ttl)
    }

    /// Composite artist, served from cache when fresh
    pub async fn artist(&self, id: &str) -> Result<Timed<Artist>, AggregateError> {
        let previous = match self.artists.lookup(id).await {
            Lookup::Fresh(artist) => return Ok(artist),
            Lookup::Miss(previous) => previous,
        };

        let result = self.build_artist(id, previous.as_ref()).await;
        self.settle(&self.artists, id, result, previous).await
    }

    /// Composite release group with every credited artist embedded
    pub async fn release_group(&self, id: &str) -> Result<Timed<ReleaseGroup>, AggregateError> {
        let previous = match self.albums.lookup(id).await {
            Lookup::Fresh(album) => return Ok(album),
            Lookup::Miss(previous) => previous,
        };

        let result = self.build_release_group(id, previous.as_ref()).await;
        self.settle(&self.albums, id, result, previous).await
    }

    /// Request-path outcome handling for a freshly built composite
    async fn settle<V>(
        &self,
        tiers: &Tiers<V>,
        id: &str,
        result: Result<Timed<V>, AggregateError>,
        previous: Option<V>,
    ) -> Result<Timed<V>, AggregateError>
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync,
    {
        match result {
            Ok(composite) => {
                tiers.store_logged(id, &composite).await;
                Ok(composite)
            }
            Err(e) if e.is_not_found() => {
                tiers.forget_logged(id).await;
                Err(e)
            }
            Err(AggregateError::Unavailable(e)) => match previous {
                Some(value) => {
                    warn!(entity = tiers.entity, mbid = %id, error = %e, "Serving stale composite");
                    let composite = Timed::new(value, self.error_expiry());
                    tiers.store_logged(id, &composite).await;
                    Ok(composite)
                }
                None => Err(AggregateError::Unavailable(e)),
            },
            Err(e) => Err(e),
        }
    }

    /// Rebuild an artist ignoring freshness and write it back
    ///
    /// Returns the new expiry. An artist gone upstream is deleted from both
    /// tiers and reported as `NotFound`.
    pub async fn refresh_artist(&self, id: &str) -> Result<DateTime<Utc>, AggregateError> {
        let previous = self.artists.previous(id).await?;
        Self::rewrite(&self.artists, id, self.build_artist(id, previous.as_ref()).await).await
    }

    pub async fn refresh_album(&self, id: &str) -> Result<DateTime<Utc>, AggregateError> {
        let previous = self.albums.previous(id).await?;
        Self::rewrite(&self.albums, id, self.build_release_group(id, previous.as_ref()).await).await
    }

    async fn rewrite<V>(
        tiers: &Tiers<V>,
        id: &str,
        result: Result<Timed<V>, AggregateError>,
    ) -> Result<DateTime<Utc>, AggregateError>
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync,
    {
        match result {
            Ok(composite) => {
                tiers.store(id, &composite).await?;
                Ok(composite.expiry)
            }
            Err(e) if e.is_not_found() => {
                info!(entity = tiers.entity, mbid = %id, "Removed upstream, deleting");
                tiers.forget(id).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn build_artist(
        &self,
        id: &str,
        previous: Option<&Artist>,
    ) -> Result<Timed<Artist>, AggregateError> {
        let now = time::now();
        let by_id = self.registry.first::<dyn ArtistById>()?;
        let record: ArtistRecord =
            essential(by_id.artists_by_id(&[id.to_string()]).await, "artist", id)?;

        let mut expiry = MinExpiry(None);
        expiry.fold(now + self.settings.artist_ttl);

        // Overview is usually the slowest sub-fetch, so it starts first
        let overview = self
            .registry
            .implementing::<dyn ArtistOverview>()
            .first()
            .cloned()
            .map(|provider| {
                let links = record.links.clone();
                SubFetch::spawn(async move { provider.overview(&links).await })
            });
        let artwork = self.spawn_artist_artwork(id);

        let overview = match overview {
            None => String::new(),
            Some(fetch) => match fetch.join().await {
                Ok(timed) => {
                    expiry.fold(timed.expiry);
                    timed.value
                }
                Err(ProviderError::NotFound) => String::new(),
                Err(e) => {
                    warn!(mbid = %id, error = %e, "Overview unavailable, using previous");
                    expiry.fold(self.error_expiry());
                    previous.map(|p| p.overview.clone()).unwrap_or_default()
                }
            },
        };

        let previous_images = previous.map(|p| p.images.as_slice()).unwrap_or(&[]);
        let images = combine_images(artwork, previous_images, self.error_expiry(), &mut expiry).await;

        debug!(mbid = %id, elapsed_ms = (time::now() - now).num_milliseconds(), "Artist aggregated");

        Ok(Timed::new(
            Artist {
                record,
                overview,
                images,
            },
            expiry.or(now),
        ))
    }

    fn spawn_artist_artwork(&self, id: &str) -> Vec<ArtworkJob> {
        self.registry
            .implementing::<dyn ArtistArtwork>()
            .iter()
            .enumerate()
            .map(|(index, provider)| {
                let provider = provider.clone();
                let id = id.to_string();
                ArtworkJob {
                    provider: index,
                    kinds: provider.artist_image_kinds(),
                    fetch: SubFetch::spawn(async move { provider.artist_images(&id).await }),
                }
            })
            .collect()
    }

    fn spawn_releases(&self, id: &str) -> Option<SubFetch<Vec<Release>>> {
        let releases = self
            .registry
            .implementing::<dyn ReleasesByReleaseGroup>()
            .first()
            .cloned()?;
        let media = self.registry.implementing::<dyn MediaByRelease>().first().cloned();
        let tracks = self
            .registry
            .implementing::<dyn TracksByReleaseGroup>()
            .first()
            .cloned();

        Some(SubFetch::spawn(fetch_releases(id.to_string(), releases, media, tracks)))
    }

    fn spawn_album_artwork(&self, id: &str) -> Vec<ArtworkJob> {
        self.registry
            .implementing::<dyn AlbumArtwork>()
            .iter()
            .enumerate()
            .map(|(index, provider)| {
                let provider = provider.clone();
                let id = id.to_string();
                ArtworkJob {
                    provider: index,
                    kinds: provider.album_image_kinds(),
                    fetch: SubFetch::spawn(async move { provider.album_images(&id).await }),
                }
            })
            .collect()
    }

    async fn build_release_group(
        &self,
        id: &str,
        previous: Option<&ReleaseGroup>,
    ) -> Result<Timed<ReleaseGroup>, AggregateError> {
        let now = time::now();
        let by_id = self.registry.first::<dyn ReleaseGroupById>()?;
        let credits = self.registry.first::<dyn ReleaseGroupArtists>()?;

        let record: ReleaseGroupRecord =
            essential(by_id.release_groups_by_id(&[id.to_string()]).await, "album", id)?;

        let mut expiry = MinExpiry(None);
        expiry.fold(now + self.settings.album_ttl);

        let releases = self.spawn_releases(id);
        let artwork = self.spawn_album_artwork(id);

        let mut artist_ids = match credits.release_group_artist_ids(id).await {
            Ok(ids) => ids,
            Err(ProviderError::NotFound) => Vec::new(),
            Err(e) => return Err(AggregateError::Unavailable(e)),
        };
        if artist_ids.is_empty() && !record.artist_id.is_empty() {
            artist_ids.push(record.artist_id.clone());
        }

        let results = join_all(artist_ids.iter().map(|artist_id| self.artist(artist_id))).await;

        let mut artists = Vec::with_capacity(artist_ids.len());
        for (artist_id, result) in artist_ids.iter().zip(results) {
            match result {
                Ok(artist) => {
                    expiry.fold(artist.expiry);
                    artists.push(artist.value);
                }
                Err(e) if e.is_not_found() => {
                    warn!(mbid = %id, artist = %artist_id, "Credited artist not found, skipping");
                }
                Err(AggregateError::MissingProvider(capability)) => {
                    return Err(AggregateError::MissingProvider(capability));
                }
                Err(e) => {
                    warn!(mbid = %id, artist = %artist_id, error = %e, "Credited artist unavailable");
                    expiry.fold(self.error_expiry());
                    let known = previous
                        .and_then(|p| p.artists.iter().find(|a| a.id() == artist_id.as_str()));
                    if let Some(artist) = known {
                        artists.push(artist.clone());
                    }
                }
            }
        }

        let releases = match releases {
            None => Vec::new(),
            Some(fetch) => match fetch.join().await {
                Ok(releases) => releases,
                Err(ProviderError::NotFound) => Vec::new(),
                Err(e) => {
                    warn!(mbid = %id, error = %e, "Releases unavailable, using previous");
                    expiry.fold(self.error_expiry());
                    previous.map(|p| p.releases.clone()).unwrap_or_default()
                }
            },
        };

        let previous_images = previous.map(|p| p.images.as_slice()).unwrap_or(&[]);
        let images = combine_images(artwork, previous_images, self.error_expiry(), &mut expiry).await;

        debug!(
            mbid = %id,
            artists = artists.len(),
            releases = releases.len(),
            elapsed_ms = (time::now() - now).num_milliseconds(),
            "Release group aggregated"
        );

        Ok(Timed::new(
            ReleaseGroup {
                record,
                images,
                releases,
                artists,
            },
            expiry.or(now),
        ))
    }

    /// Album list for an artist, cached in the fast tier only
    pub async fn artist_release_groups(
        &self,
        id: &str,
    ) -> Result<Timed<Vec<ReleaseGroupSummary>>, AggregateError> {
        let provider = self.registry.first::<dyn ArtistReleaseGroups>()?;
        let policy = CachePolicy {
            ttl: self.settings.album_ttl,
            error_ttl: self.settings.error_ttl,
        };

        cached_call(&self.artist_albums, id, policy, false, |_| {
            provider.release_groups_by_artist(id)
        })
        .await
        .map_err(|e| match e {
            ProviderError::NotFound => AggregateError::NotFound {
                entity: "artist",
                id: id.to_string(),
            },
            other => AggregateError::Unavailable(other),
        })
    }

    pub async fn search_artists(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Timed<Vec<Artist>>, AggregateError> {
        let providers = self.registry.implementing::<dyn ArtistNameSearch>();
        let mut last_error = None;
        let mut hits = None;

        for provider in providers {
            match provider.search_artist_name(query, limit).await {
                Ok(found) => {
                    hits = Some(found);
                    break;
                }
                Err(e) if e.is_unavailable() => {
                    warn!(query, error = %e, "Artist search provider unavailable, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(AggregateError::Unavailable(e)),
            }
        }

        let hits = resolve_hits::<dyn ArtistNameSearch>(hits, last_error)?;
        let results = join_all(hits.iter().map(|hit| self.artist(&hit.id))).await;
        collect_hits(&hits, results)
    }

    pub async fn search_release_groups(
        &self,
        query: &str,
        artist_name: Option<&str>,
        limit: usize,
    ) -> Result<Timed<Vec<ReleaseGroup>>, AggregateError> {
        let providers = self.registry.implementing::<dyn AlbumNameSearch>();
        let mut last_error = None;
        let mut hits = None;

        for provider in providers {
            match provider.search_album_name(query, artist_name, limit).await {
                Ok(found) => {
                    hits = Some(found);
                    break;
                }
                Err(e) if e.is_unavailable() => {
                    warn!(query, error = %e, "Album search provider unavailable, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(AggregateError::Unavailable(e)),
            }
        }

        let hits = resolve_hits::<dyn AlbumNameSearch>(hits, last_error)?;
        let results = join_all(hits.iter().map(|hit| self.release_group(&hit.id))).await;
        collect_hits(&hits, results)
    }

    /// Track search against the first provider that answers
    ///
    /// Hits are raw database rows, so they share the release group lifetime.
    pub async fn search_tracks(
        &self,
        query: &str,
        artist_name: Option<&str>,
        album_name: Option<&str>,
        limit: usize,
    ) -> Result<Timed<Vec<TrackHit>>, AggregateError> {
        let now = time::now();
        let mut last_error = None;

        for provider in self.registry.implementing::<dyn TrackSearch>() {
            match provider.search_track(query, artist_name, album_name, limit).await {
                Ok(hits) => return Ok(Timed::new(hits, now + self.settings.album_ttl)),
                Err(e) if e.is_unavailable() => {
                    warn!(query, error = %e, "Track search provider unavailable, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(AggregateError::Unavailable(e)),
            }
        }

        match last_error {
            Some(e) => Err(AggregateError::Unavailable(e)),
            None => Err(AggregateError::MissingProvider(capability_name::<dyn TrackSearch>())),
        }
    }
}

fn resolve_hits<C: ?Sized>(
    hits: Option<Vec<SearchHit>>,
    last_error: Option<ProviderError>,
) -> Result<Vec<SearchHit>, AggregateError> {
    match (hits, last_error) {
        (Some(hits), _) => Ok(hits),
        (None, Some(e)) => Err(AggregateError::Unavailable(e)),
        (None, None) => Err(AggregateError::MissingProvider(capability_name::<C>())),
    }
}

/// Composites for search hits in hit order; hits that fail to aggregate are dropped
fn collect_hits<V>(
    hits: &[SearchHit],
    results: Vec<Result<Timed<V>, AggregateError>>,
) -> Result<Timed<Vec<V>>, AggregateError> {
    let mut expiry = MinExpiry(None);
    let mut values = Vec::with_capacity(results.len());

    for (hit, result) in hits.iter().zip(results) {
        match result {
            Ok(composite) => {
                expiry.fold(composite.expiry);
                values.push(composite.value);
            }
            Err(AggregateError::MissingProvider(capability)) => {
                return Err(AggregateError::MissingProvider(capability));
            }
            Err(e) => debug!(mbid = %hit.id, error = %e, "Dropping search hit"),
        }
    }

    Ok(Timed::new(values, expiry.or(time::now())))
}

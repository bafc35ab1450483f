//! fanart.tv artwork provider
//!
//! Images are cached per subject in the `fanart` durable table under
//! `artist:{mbid}` and `album:{mbid}`. A 404 means fanart.tv has nothing for
//! the subject and clears the cache; an empty 200 body does not.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::keep_previous_if_empty;
use crate::cache::{cached_call, Cache, CachePolicy, DurableTier};
use crate::capabilities::{AlbumArtwork, ArtistArtwork, CacheRefresh, InvalidateCache};
use crate::error::{AggregateError, ProviderError};
use crate::http::HttpProvider;
use crate::models::{Image, ImageKind, InvalidationResult, Timed};
use crate::registry::{CapabilitySet, Provider};
use crate::stats::StatsSnapshot;

const ARTIST_KINDS: &[ImageKind] = &[
    ImageKind::Banner,
    ImageKind::Fanart,
    ImageKind::Logo,
    ImageKind::Poster,
];
const ALBUM_KINDS: &[ImageKind] = &[ImageKind::Cover, ImageKind::Disc];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subject {
    Artist,
    Album,
}

impl Subject {
    fn key(self, mbid: &str) -> String {
        match self {
            Subject::Artist => format!("artist:{}", mbid),
            Subject::Album => format!("album:{}", mbid),
        }
    }

    fn parse_key(key: &str) -> Option<(Subject, &str)> {
        if let Some(mbid) = key.strip_prefix("artist:") {
            Some((Subject::Artist, mbid))
        } else {
            key.strip_prefix("album:").map(|mbid| (Subject::Album, mbid))
        }
    }
}

pub struct FanArtTvProvider {
    http: HttpProvider,
    api_key: String,
    base_url: String,
    cache: Cache<Vec<Image>, dyn DurableTier>,
    policy: CachePolicy,
    /// Delay before a change shows up in the updates feed
    lag: Duration,
}

impl FanArtTvProvider {
    pub fn new(
        http: HttpProvider,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        durable: Arc<dyn DurableTier>,
        policy: CachePolicy,
        lag: Duration,
    ) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Self {
            http,
            api_key: api_key.into(),
            base_url,
            cache: Cache::new(durable),
            policy,
            lag,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{}?api_key={}",
            self.base_url,
            path,
            urlencoding::encode(&self.api_key)
        )
    }

    async fn images(
        &self,
        subject: Subject,
        mbid: &str,
        force: bool,
    ) -> Result<Timed<Vec<Image>>, ProviderError> {
        let url = match subject {
            Subject::Artist => self.url(mbid),
            Subject::Album => self.url(&format!("albums/{}", mbid)),
        };

        cached_call(&self.cache, &subject.key(mbid), self.policy, force, |previous| async move {
            match self.http.get_json::<Value>(&url).await {
                Ok(body) => {
                    let images = match subject {
                        Subject::Artist => parse_artist_images(&body),
                        Subject::Album => parse_album_images(&body, mbid),
                    };
                    Ok(keep_previous_if_empty(images, previous))
                }
                Err(ProviderError::NotFound) => {
                    debug!(mbid, "fanart.tv has no images");
                    Ok(Vec::new())
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Artist ids in the updates feed from `since` onwards
    async fn updated_artists(&self, since: DateTime<Utc>) -> Result<HashSet<String>, ProviderError> {
        let url = format!("{}&date={}", self.url("latest"), since.timestamp());
        let body: Value = self.http.get_json(&url).await?;

        let entries = body
            .as_array()
            .ok_or_else(|| ProviderError::Malformed("updates feed is not a list".into()))?;

        Ok(entries
            .iter()
            .filter_map(|entry| entry.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}

/// First URL of each category in a fanart.tv response
fn pick(body: &Value, field: &str, kind: ImageKind) -> Option<Image> {
    body.get(field)?
        .as_array()?
        .first()?
        .get("url")?
        .as_str()
        .map(|url| Image::new(kind, url))
}

pub fn parse_artist_images(body: &Value) -> Vec<Image> {
    [
        ("musicbanner", ImageKind::Banner),
        ("artistbackground", ImageKind::Fanart),
        ("hdmusiclogo", ImageKind::Logo),
        ("artistthumb", ImageKind::Poster),
    ]
    .into_iter()
    .filter_map(|(field, kind)| pick(body, field, kind))
    .collect()
}

/// Images of release group `mbid` only; other albums in the body are ignored
pub fn parse_album_images(body: &Value, mbid: &str) -> Vec<Image> {
    let Some(album) = body.get("albums").and_then(|albums| albums.get(mbid)) else {
        return Vec::new();
    };

    [("albumcover", ImageKind::Cover), ("cdart", ImageKind::Disc)]
        .into_iter()
        .filter_map(|(field, kind)| pick(album, field, kind))
        .collect()
}

#[async_trait]
impl Provider for FanArtTvProvider {
    fn name(&self) -> &str {
        "fanart"
    }

    fn register_capabilities(self: Arc<Self>, capabilities: &mut CapabilitySet) {
        capabilities.add::<dyn ArtistArtwork>(self.clone());
        capabilities.add::<dyn AlbumArtwork>(self.clone());
        capabilities.add::<dyn InvalidateCache>(self.clone());
        capabilities.add::<dyn CacheRefresh>(self);
    }

    async fn init(&self) -> Result<(), ProviderError> {
        if self.api_key.is_empty() {
            warn!("fanart.tv API key not configured, requests will fail");
        }
        Ok(())
    }

    fn stats(&self) -> Option<StatsSnapshot> {
        Some(self.http.stats().snapshot())
    }
}

#[async_trait]
impl ArtistArtwork for FanArtTvProvider {
    fn artist_image_kinds(&self) -> &'static [ImageKind] {
        ARTIST_KINDS
    }

    async fn artist_images(&self, id: &str) -> Result<Timed<Vec<Image>>, ProviderError> {
        self.images(Subject::Artist, id, false).await
    }
}

#[async_trait]
impl AlbumArtwork for FanArtTvProvider {
    fn album_image_kinds(&self) -> &'static [ImageKind] {
        ALBUM_KINDS
    }

    async fn album_images(&self, id: &str) -> Result<Timed<Vec<Image>>, ProviderError> {
        self.images(Subject::Album, id, false).await
    }
}

#[async_trait]
impl InvalidateCache for FanArtTvProvider {
    fn watermark_name(&self) -> &str {
        "fanart"
    }

    async fn current_watermark(&self) -> Result<DateTime<Utc>, ProviderError> {
        Ok(mdagg_common::time::now())
    }

    /// Changes that became visible in the feed between the two sweeps
    ///
    /// The feed lags by `lag`, so a change made at `t` is listed from `t + lag`.
    /// Everything listed since `since - lag` minus everything listed since
    /// `until - lag` is exactly the set that surfaced in between.
    async fn changed_since(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<InvalidationResult, ProviderError> {
        let earlier = self.updated_artists(since - self.lag).await?;
        let later = self.updated_artists(until - self.lag).await?;

        let artists: std::collections::BTreeSet<String> =
            earlier.difference(&later).cloned().collect();

        for mbid in &artists {
            if let Err(e) = self
                .cache
                .expire(&Subject::Artist.key(mbid), Duration::seconds(-1))
                .await
            {
                warn!(mbid = %mbid, error = %e, "Failed to expire fanart entry");
            }
        }

        info!(count = artists.len(), "fanart.tv artists changed");
        Ok(InvalidationResult {
            artists,
            albums: Default::default(),
        })
    }
}

#[async_trait]
impl CacheRefresh for FanArtTvProvider {
    fn cache_name(&self) -> &str {
        "fanart"
    }

    fn durable(&self) -> Arc<dyn DurableTier> {
        self.cache.tier().clone()
    }

    async fn refresh(&self, key: &str) -> Result<DateTime<Utc>, AggregateError> {
        let (subject, mbid) = Subject::parse_key(key).ok_or_else(|| AggregateError::NotFound {
            entity: "fanart entry",
            id: key.to_string(),
        })?;

        Ok(self.images(subject, mbid, true).await?.expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_artist_images_takes_first_of_each_kind() {
        let body = json!({
            "hdmusiclogo": [{"url": "http://a/logo1.png"}, {"url": "http://a/logo2.png"}],
            "artistthumb": [{"url": "http://a/thumb.jpg"}],
            "musicbanner": []
        });

        let images = parse_artist_images(&body);

        assert_eq!(
            images,
            vec![
                Image::new(ImageKind::Logo, "http://a/logo1.png"),
                Image::new(ImageKind::Poster, "http://a/thumb.jpg"),
            ]
        );
    }

    #[test]
    fn test_parse_album_images_selects_requested_album() {
        let body = json!({
            "albums": {
                "other": {"albumcover": [{"url": "http://a/other.jpg"}]},
                "rg-1": {
                    "albumcover": [{"url": "http://a/cover.jpg"}],
                    "cdart": [{"url": "http://a/disc.png"}]
                }
            }
        });

        let images = parse_album_images(&body, "rg-1");

        assert_eq!(images.len(), 2);
        assert_eq!(images[0], Image::new(ImageKind::Cover, "http://a/cover.jpg"));
        assert_eq!(images[1], Image::new(ImageKind::Disc, "http://a/disc.png"));
    }

    #[test]
    fn test_parse_album_images_ignores_other_albums() {
        let body = json!({
            "albums": {
                "other": {"albumcover": [{"url": "http://a/other.jpg"}]}
            }
        });

        assert!(parse_album_images(&body, "rg-1").is_empty());
    }

    #[test]
    fn test_subject_key_roundtrip() {
        assert_eq!(
            Subject::parse_key(&Subject::Album.key("x")),
            Some((Subject::Album, "x"))
        );
        assert_eq!(Subject::parse_key("bogus"), None);
    }
}

//! TheAudioDB artwork provider, the second artist artwork source
//!
//! Cached per artist mbid in the `theaudiodb` durable table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use super::keep_previous_if_empty;
use crate::cache::{cached_call, Cache, CachePolicy, DurableTier};
use crate::capabilities::{ArtistArtwork, CacheRefresh};
use crate::error::{AggregateError, ProviderError};
use crate::http::HttpProvider;
use crate::models::{Image, ImageKind, Timed};
use crate::registry::{CapabilitySet, Provider};
use crate::stats::StatsSnapshot;

const ARTIST_KINDS: &[ImageKind] = &[
    ImageKind::Banner,
    ImageKind::Fanart,
    ImageKind::Logo,
    ImageKind::Poster,
];

pub struct TheAudioDbProvider {
    http: HttpProvider,
    api_key: String,
    base_url: String,
    cache: Cache<Vec<Image>, dyn DurableTier>,
    policy: CachePolicy,
}

impl TheAudioDbProvider {
    pub fn new(
        http: HttpProvider,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        durable: Arc<dyn DurableTier>,
        policy: CachePolicy,
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
        }
    }

    async fn images(&self, mbid: &str, force: bool) -> Result<Timed<Vec<Image>>, ProviderError> {
        let url = format!(
            "{}{}/artist-mb.php?i={}",
            self.base_url,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(mbid)
        );

        cached_call(&self.cache, mbid, self.policy, force, |previous| async move {
            let body: Value = self.http.get_json(&url).await?;
            Ok(keep_previous_if_empty(parse_artist_images(&body), previous))
        })
        .await
    }
}

pub fn parse_artist_images(body: &Value) -> Vec<Image> {
    let Some(artist) = body
        .get("artists")
        .and_then(Value::as_array)
        .and_then(|artists| artists.first())
    else {
        return Vec::new();
    };

    [
        ("strArtistBanner", ImageKind::Banner),
        ("strArtistFanart", ImageKind::Fanart),
        ("strArtistLogo", ImageKind::Logo),
        ("strArtistThumb", ImageKind::Poster),
    ]
    .into_iter()
    .filter_map(|(field, kind)| {
        artist
            .get(field)
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(|url| Image::new(kind, url))
    })
    .collect()
}

#[async_trait]
impl Provider for TheAudioDbProvider {
    fn name(&self) -> &str {
        "theaudiodb"
    }

    fn register_capabilities(self: Arc<Self>, capabilities: &mut CapabilitySet) {
        capabilities.add::<dyn ArtistArtwork>(self.clone());
        capabilities.add::<dyn CacheRefresh>(self);
    }

    fn stats(&self) -> Option<StatsSnapshot> {
        Some(self.http.stats().snapshot())
    }
}

#[async_trait]
impl ArtistArtwork for TheAudioDbProvider {
    fn artist_image_kinds(&self) -> &'static [ImageKind] {
        ARTIST_KINDS
    }

    async fn artist_images(&self, id: &str) -> Result<Timed<Vec<Image>>, ProviderError> {
        self.images(id, false).await
    }
}

#[async_trait]
impl CacheRefresh for TheAudioDbProvider {
    fn cache_name(&self) -> &str {
        "theaudiodb"
    }

    fn durable(&self) -> Arc<dyn DurableTier> {
        self.cache.tier().clone()
    }

    async fn refresh(&self, key: &str) -> Result<DateTime<Utc>, AggregateError> {
        Ok(self.images(key, true).await?.expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_skips_empty_and_null_fields() {
        let body = json!({
            "artists": [{
                "strArtistThumb": "http://t/thumb.jpg",
                "strArtistLogo": "",
                "strArtistFanart": null
            }]
        });

        assert_eq!(
            parse_artist_images(&body),
            vec![Image::new(ImageKind::Poster, "http://t/thumb.jpg")]
        );
    }

    #[test]
    fn test_parse_null_artists_is_empty() {
        assert!(parse_artist_images(&json!({"artists": null})).is_empty());
    }
}

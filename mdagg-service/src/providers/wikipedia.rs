//! Wikipedia overview provider
//!
//! Resolves an artist's wikipedia or wikidata link to the page summary. Results
//! are cached per link URL in the `wikipedia` durable table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{cached_call, Cache, CachePolicy, DurableTier};
use crate::capabilities::{ArtistOverview, CacheRefresh};
use crate::error::{AggregateError, ProviderError};
use crate::http::HttpProvider;
use crate::models::{Link, Timed};
use crate::registry::{CapabilitySet, Provider};
use crate::stats::StatsSnapshot;

/// A page on a language edition of wikipedia
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiPage {
    pub language: String,
    pub title: String,
}

pub struct WikipediaProvider {
    http: HttpProvider,
    wikidata_api_url: String,
    cache: Cache<String, dyn DurableTier>,
    policy: CachePolicy,
}

impl WikipediaProvider {
    pub fn new(
        http: HttpProvider,
        wikidata_api_url: impl Into<String>,
        durable: Arc<dyn DurableTier>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            http,
            wikidata_api_url: wikidata_api_url.into(),
            cache: Cache::new(durable),
            policy,
        }
    }

    async fn overview_for_url(&self, url: &str, force: bool) -> Result<Timed<String>, ProviderError> {
        cached_call(&self.cache, url, self.policy, force, |_| self.fetch_summary(url)).await
    }

    async fn fetch_summary(&self, url: &str) -> Result<String, ProviderError> {
        let page = if let Some(entity) = entity_from_url(url) {
            match self.english_page(&entity).await? {
                Some(page) => page,
                None => {
                    debug!(url, "No English page for wikidata entity");
                    return Ok(String::new());
                }
            }
        } else if let Some(page) = page_from_url(url) {
            page
        } else {
            warn!(url, "Unrecognized wikipedia link");
            return Ok(String::new());
        };

        let summary_url = format!(
            "https://{}.wikipedia.org/api/rest_v1/page/summary/{}",
            page.language,
            urlencoding::encode(&page.title.replace(' ', "_"))
        );

        match self.http.get_json::<Value>(&summary_url).await {
            Ok(body) => Ok(body
                .get("extract")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()),
            // A missing page is an authoritative empty overview
            Err(ProviderError::NotFound) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    async fn english_page(&self, entity: &str) -> Result<Option<WikiPage>, ProviderError> {
        let url = format!(
            "{}?action=wbgetentities&ids={}&props=sitelinks&sitefilter=enwiki&format=json",
            self.wikidata_api_url,
            urlencoding::encode(entity)
        );
        let body: Value = self.http.get_json(&url).await?;

        Ok(body
            .pointer(&format!("/entities/{}/sitelinks/enwiki/title", entity))
            .and_then(Value::as_str)
            .map(|title| WikiPage {
                language: "en".to_string(),
                title: title.to_string(),
            }))
    }
}

/// Preferred link: English wikipedia, then wikidata, then any wikipedia edition
pub fn pick_link(links: &[Link]) -> Option<&str> {
    let english = links
        .iter()
        .find(|l| l.link_type == "wikipedia" && page_from_url(&l.target).is_some_and(|p| p.language == "en"));
    let wikidata = || links.iter().find(|l| l.link_type == "wikidata");
    let any = || links.iter().find(|l| l.link_type == "wikipedia");

    english.or_else(wikidata).or_else(any).map(|l| l.target.as_str())
}

/// `https://{lang}.wikipedia.org/wiki/{title}`
pub fn page_from_url(url: &str) -> Option<WikiPage> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let (host, path) = rest.split_once('/')?;
    let language = host.strip_suffix(".wikipedia.org")?;
    let title = path.strip_prefix("wiki/")?;

    if language.is_empty() || title.is_empty() {
        return None;
    }

    let title = urlencoding::decode(title).ok()?.replace('_', " ");
    Some(WikiPage {
        language: language.to_string(),
        title,
    })
}

/// Entity id from `https://www.wikidata.org/wiki/{id}` or `/entity/{id}`
pub fn entity_from_url(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let path = rest.strip_prefix("www.wikidata.org/")?;
    let entity = path
        .strip_prefix("wiki/")
        .or_else(|| path.strip_prefix("entity/"))?;

    (!entity.is_empty()).then(|| entity.to_string())
}

#[async_trait]
impl Provider for WikipediaProvider {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn register_capabilities(self: Arc<Self>, capabilities: &mut CapabilitySet) {
        capabilities.add::<dyn ArtistOverview>(self.clone());
        capabilities.add::<dyn CacheRefresh>(self);
    }

    fn stats(&self) -> Option<StatsSnapshot> {
        Some(self.http.stats().snapshot())
    }
}

#[async_trait]
impl ArtistOverview for WikipediaProvider {
    async fn overview(&self, links: &[Link]) -> Result<Timed<String>, ProviderError> {
        match pick_link(links) {
            Some(url) => self.overview_for_url(url, false).await,
            None => Ok(Timed::new(
                String::new(),
                mdagg_common::time::expiry_after(self.policy.ttl),
            )),
        }
    }
}

#[async_trait]
impl CacheRefresh for WikipediaProvider {
    fn cache_name(&self) -> &str {
        "wikipedia"
    }

    fn durable(&self) -> Arc<dyn DurableTier> {
        self.cache.tier().clone()
    }

    async fn refresh(&self, key: &str) -> Result<DateTime<Utc>, AggregateError> {
        Ok(self.overview_for_url(key, true).await?.expiry)
    }
}

//! Edge cache purge client
//!
//! Posts batches of public resource URLs to a Cloudflare-style
//! `zones/{zone}/purge_cache` endpoint. Purging is best effort: a batch that
//! still fails after its retries is logged and skipped.

use serde::Deserialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EdgeCacheConfig;
use crate::http::{HttpProvider, HttpSettings};
use crate::limit::NullRateLimiter;

type Pacer = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Deserialize)]
struct PurgeResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<Value>,
}

pub struct EdgePurger {
    config: EdgeCacheConfig,
    http: HttpProvider,
    pacer: Pacer,
}

impl EdgePurger {
    pub fn new(config: EdgeCacheConfig, settings: HttpSettings) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            http: HttpProvider::new("edge_cache", settings, Arc::new(NullRateLimiter)),
            pacer: governor::RateLimiter::direct(governor::Quota::per_second(per_second)),
            config,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled()
    }

    fn endpoint(&self) -> String {
        let api = self.config.api_url.trim_end_matches('/');
        format!("{}/zones/{}/purge_cache", api, self.config.zone_id)
    }

    /// Purge `urls`; returns how many were confirmed purged
    pub async fn purge(&self, urls: &[String]) -> usize {
        if !self.enabled() || urls.is_empty() {
            debug!(count = urls.len(), "Edge purge skipped");
            return 0;
        }

        let endpoint = self.endpoint();
        let headers = [
            ("X-Auth-Email", self.config.auth_email.as_str()),
            ("X-Auth-Key", self.config.auth_key.as_str()),
        ];

        let mut purged = 0;
        for batch in urls.chunks(self.config.batch_size.max(1)) {
            if self.purge_batch(&endpoint, &headers, batch).await {
                purged += batch.len();
            } else {
                warn!(count = batch.len(), "Edge purge batch failed after retries");
            }
        }

        info!(purged, requested = urls.len(), "Edge cache purge finished");
        purged
    }

    async fn purge_batch(&self, endpoint: &str, headers: &[(&str, &str)], batch: &[String]) -> bool {
        let body = json!({ "files": batch });

        for attempt in 0..=self.config.retries {
            self.pacer.until_ready().await;

            match self.http.post_json::<_, PurgeResponse>(endpoint, headers, &body).await {
                Ok(response) if response.success => return true,
                Ok(response) => {
                    warn!(attempt, errors = ?response.errors, "Edge purge rejected");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Edge purge request failed");
                }
            }
        }

        false
    }
}

//! Rate-limited JSON client shared by the HTTP providers
//!
//! Every call:
//! 1. asks the injected [`RateLimiter`] for admission (denied: `RateLimited`, no request)
//! 2. sends with a wall-clock timeout covering the response body
//! 3. classifies the outcome into a [`ProviderError`] and counts it

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::limit::RateLimiter;
use crate::stats::ProviderStats;

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            user_agent: concat!("mdagg/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

pub struct HttpProvider {
    name: String,
    settings: HttpSettings,
    /// Created on first use; concurrent first callers share one client
    client: OnceCell<Client>,
    limiter: Arc<dyn RateLimiter>,
    stats: Arc<ProviderStats>,
}

impl HttpProvider {
    pub fn new(
        name: impl Into<String>,
        settings: HttpSettings,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            client: OnceCell::new(),
            limiter,
            stats: Arc::new(ProviderStats::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &Arc<ProviderStats> {
        &self.stats
    }

    async fn client(&self) -> Result<&Client, ProviderError> {
        self.client
            .get_or_try_init(|| async {
                debug!(provider = %self.name, "Creating HTTP client");
                Client::builder()
                    .user_agent(&self.settings.user_agent)
                    .build()
                    .map_err(|e| ProviderError::Transport(e.to_string()))
            })
            .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        self.get_json_with_headers(url, &[]).await
    }

    pub async fn get_json_with_headers<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let client = self.client().await?;
        let request = headers
            .iter()
            .fold(client.get(url), |request, (name, value)| request.header(*name, *value));
        self.execute(url, request).await
    }

    pub async fn post_json<B, T>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &B,
    ) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let client = self.client().await?;
        let request = headers
            .iter()
            .fold(client.post(url).json(body), |request, (name, value)| {
                request.header(*name, *value)
            });
        self.execute(url, request).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        url: &str,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        match self.limiter.try_acquire().await {
            Ok(true) => {}
            Ok(false) => {
                self.stats.record::<()>(&Err(ProviderError::RateLimited));
                debug!(provider = %self.name, url, "Rate limited, request not sent");
                return Err(ProviderError::RateLimited);
            }
            // A broken limiter backend must not take the provider down with it
            Err(e) => warn!(provider = %self.name, error = %e, "Rate limiter unavailable, admitting"),
        }

        let started = Instant::now();
        let timeout = self.settings.timeout;

        let outcome = match tokio::time::timeout(timeout, send_and_parse::<T>(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };

        self.stats.record(&outcome);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => debug!(provider = %self.name, url, elapsed_ms, "Request succeeded"),
            Err(e) => debug!(provider = %self.name, url, elapsed_ms, error = %e, "Request failed"),
        }

        outcome
    }
}

async fn send_and_parse<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ProviderError> {
    let response = request.send().await.map_err(classify)?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound);
    }
    if !status.is_success() {
        return Err(ProviderError::Status(status.as_u16()));
    }

    let body = response.bytes().await.map_err(classify)?;
    serde_json::from_slice(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

fn classify(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(Duration::ZERO)
    } else {
        ProviderError::Transport(err.to_string())
    }
}

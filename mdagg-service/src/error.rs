//! Error types for mdagg-service
//!
//! Three layers:
//! - [`ProviderError`]: the classification every upstream call site produces
//! - [`AggregateError`]: what the Aggregator reports to its callers
//! - [`ApiError`]: HTTP mapping for the route layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Coarse outcome class used by orchestration logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Upstream affirmatively has no such entity
    NotFound,
    /// Recoverable: timeout, transport failure, server error, malformed body
    Unavailable,
    /// Self-imposed throttling (counted separately, handled as unavailable)
    RateLimited,
    /// Upstream refused the request (4xx other than 404/429)
    Rejected,
}

/// Outcome of a single upstream call
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Not found")]
    NotFound,

    #[error("Rate limited")]
    RateLimited,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::NotFound => ErrorKind::NotFound,
            ProviderError::RateLimited => ErrorKind::RateLimited,
            ProviderError::Status(code) if (400..500).contains(code) && *code != 429 => {
                ErrorKind::Rejected
            }
            ProviderError::Timeout(_)
            | ProviderError::Transport(_)
            | ProviderError::Status(_)
            | ProviderError::Malformed(_)
            | ProviderError::Database(_) => ErrorKind::Unavailable,
        }
    }

    /// True when a stale cached value should be served instead
    pub fn is_unavailable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable | ErrorKind::RateLimited)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<sqlx::Error> for ProviderError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ProviderError::NotFound,
            other => ProviderError::Database(other.to_string()),
        }
    }
}

/// Failure of an aggregation call
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// No registered provider implements a required capability
    #[error("No provider registered for {0}")]
    MissingProvider(&'static str),

    #[error("Provider unavailable: {0}")]
    Unavailable(#[from] ProviderError),

    #[error("Cache error: {0}")]
    Cache(#[from] mdagg_common::Error),
}

impl AggregateError {
    /// Includes a raw provider `NotFound` passed through by a single-key refresh
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AggregateError::NotFound { .. } | AggregateError::Unavailable(ProviderError::NotFound)
        )
    }
}

/// Failure of an invalidation sweep
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Upstream change query failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Cache error: {0}")]
    Cache(#[from] mdagg_common::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. an invalidation sweep is already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream unavailable and nothing cached (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<AggregateError> for ApiError {
    fn from(err: AggregateError) -> Self {
        match err {
            AggregateError::NotFound { entity, .. } => {
                ApiError::NotFound(format!("{} not found", capitalize(entity)))
            }
            AggregateError::MissingProvider(capability) => {
                error!(capability, "No provider registered for required capability");
                ApiError::Internal(format!("No {} provider available", capability))
            }
            AggregateError::Unavailable(e) => ApiError::Unavailable(e.to_string()),
            AggregateError::Cache(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<SweepError> for ApiError {
    fn from(err: SweepError) -> Self {
        match err {
            SweepError::Provider(e) => ApiError::Unavailable(e.to_string()),
            SweepError::Cache(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

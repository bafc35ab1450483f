//! Common error types for mdagg

use thiserror::Error;

/// Common result type for mdagg operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the server, the crawler and the cache tiers
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored blob could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected argument, such as an unsafe cache table name
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

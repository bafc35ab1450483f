//! # mdagg common library
//!
//! Shared code for the metadata aggregation server and its crawler:
//! - Error and result types
//! - Configuration file resolution and TOML loading
//! - SQLite pool initialization for the durable cache
//! - Timestamp and TTL helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};

//! Outbound call outcome counters
//!
//! Counting is a side effect only; nothing reads these to make decisions.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ProviderError;

#[derive(Debug, Default)]
pub struct ProviderStats {
    success: AtomicU64,
    not_found: AtomicU64,
    timeout: AtomicU64,
    rate_limited: AtomicU64,
    transport: AtomicU64,
    status: AtomicU64,
    malformed: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub success: u64,
    pub not_found: u64,
    pub timeout: u64,
    pub rate_limited: u64,
    pub transport: u64,
    pub status: u64,
    pub malformed: u64,
}

impl ProviderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T>(&self, outcome: &Result<T, ProviderError>) {
        let counter = match outcome {
            Ok(_) => &self.success,
            Err(ProviderError::NotFound) => &self.not_found,
            Err(ProviderError::Timeout(_)) => &self.timeout,
            Err(ProviderError::RateLimited) => &self.rate_limited,
            Err(ProviderError::Transport(_)) | Err(ProviderError::Database(_)) => &self.transport,
            Err(ProviderError::Status(_)) => &self.status,
            Err(ProviderError::Malformed(_)) => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            success: self.success.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            transport: self.transport.load(Ordering::Relaxed),
            status: self.status.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

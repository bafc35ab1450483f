//! Timestamp utilities
//!
//! Cache expiries are absolute UTC instants. TTLs are signed: a zero or negative
//! TTL yields an expiry at or before `now`, which is how "known but stale"
//! entries are written.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// The Unix epoch, reported as the expiry of a missing entry
pub fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// Absolute expiry for a TTL starting now
pub fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    now() + ttl
}

/// Remaining TTL until `expiry`, negative if it already passed
pub fn ttl_until(expiry: DateTime<Utc>) -> Duration {
    expiry - now()
}

/// Convert seconds from configuration to a signed duration
pub fn seconds(secs: i64) -> Duration {
    Duration::seconds(secs)
}

/// Millisecond timestamp used for SQLite storage
pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Inverse of [`to_millis`]; out-of-range values clamp to the epoch
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(epoch)
}

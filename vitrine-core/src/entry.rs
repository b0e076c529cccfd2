//! Cache entries and the freshness rule.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> EpochMillis {
    Utc::now().timestamp_millis()
}

/// A cached value with the metadata that decides whether it may be served.
///
/// Entries are immutable once written; an update replaces the whole entry.
/// The serialized field names are the persisted layout of every tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time in epoch milliseconds.
    pub timestamp: EpochMillis,
    pub version: u32,
    pub ttl_ms: u64,
}

impl<T> CacheEntry<T> {
    /// Create an entry stamped with the current time.
    pub fn new(data: T, version: u32, ttl_ms: u64) -> Self {
        Self::at(data, now_millis(), version, ttl_ms)
    }

    /// Create an entry with an explicit write time.
    pub fn at(data: T, timestamp: EpochMillis, version: u32, ttl_ms: u64) -> Self {
        Self {
            data,
            timestamp,
            version,
            ttl_ms,
        }
    }

    /// Age of the entry at `now`, clamped at zero.
    pub fn age_ms(&self, now: EpochMillis) -> u64 {
        now.saturating_sub(self.timestamp).max(0) as u64
    }

    /// True once the entry has outlived its TTL.
    pub fn is_expired(&self, now: EpochMillis) -> bool {
        self.age_ms(now) >= self.ttl_ms
    }

    /// Fresh iff `now - timestamp < ttl` and the version matches.
    pub fn is_fresh(&self, now: EpochMillis, requested_version: u32) -> bool {
        !self.is_expired(now) && self.version == requested_version
    }

    /// Classify the entry for a read at `now` with `requested_version`.
    ///
    /// A version mismatch is never served, not even as a stale value.
    pub fn classify(&self, now: EpochMillis, requested_version: u32) -> Staleness {
        if self.version != requested_version {
            Staleness::WrongVersion
        } else if self.is_expired(now) {
            Staleness::Stale
        } else {
            Staleness::Fresh
        }
    }

    /// Convert the payload, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> CacheEntry<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheEntry {
            data: f(self.data),
            timestamp: self.timestamp,
            version: self.version,
            ttl_ms: self.ttl_ms,
        }
    }
}

/// How an entry relates to a particular read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    /// Right version but past its TTL; eligible for refresh-ahead.
    Stale,
    WrongVersion,
}

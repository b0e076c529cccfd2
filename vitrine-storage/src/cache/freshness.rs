//! Read results that carry where the value came from and how fresh it is.

use chrono::{DateTime, Utc};
use std::time::Duration;

use vitrine_core::{EpochMillis, TierKind};

/// Where a value returned by the cache store came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Served by a tier.
    Tier(TierKind),
    /// Produced by the caller's fetcher.
    Origin,
}

/// Result of a cache read, carrying staleness metadata.
///
/// A read that served a stale value while a background refresh runs is
/// flagged with [`CacheRead::is_refreshing`].
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    cached_at: DateTime<Utc>,
    source: CacheSource,
    refreshing: bool,
}

impl<T> CacheRead<T> {
    /// A fresh hit from `tier`.
    pub fn from_tier(value: T, tier: TierKind, timestamp: EpochMillis) -> Self {
        Self {
            value,
            cached_at: DateTime::from_timestamp_millis(timestamp).unwrap_or_else(Utc::now),
            source: CacheSource::Tier(tier),
            refreshing: false,
        }
    }

    /// A stale hit from `tier` served while a refresh runs in the background.
    pub fn stale_from_tier(value: T, tier: TierKind, timestamp: EpochMillis) -> Self {
        Self {
            refreshing: true,
            ..Self::from_tier(value, tier, timestamp)
        }
    }

    /// A value just produced by the fetcher.
    pub fn from_origin(value: T) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            source: CacheSource::Origin,
            refreshing: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> CacheSource {
        self.source
    }

    /// When the value was written (or fetched, for origin reads).
    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    pub fn was_cache_hit(&self) -> bool {
        matches!(self.source, CacheSource::Tier(_))
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    /// How long ago the value was written.
    pub fn staleness(&self) -> Duration {
        (Utc::now() - self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            source: self.source,
            refreshing: self.refreshing,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

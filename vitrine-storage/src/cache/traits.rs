//! Cache tier trait and cache statistics.
//!
//! Every tier stores the same [`StoredEntry`] shape so an entry read from one
//! tier can be written into another unchanged.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vitrine_core::{CacheEntry, CacheRegion, EpochMillis, TierKind, VitrineResult};

use super::region_key::RegionScopedKey;

/// The entry shape shared by all tiers.
pub type StoredEntry = CacheEntry<serde_json::Value>;

/// Bookkeeping slot written by the cleanup sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupMetadata {
    pub last_cleanup: EpochMillis,
    /// Cumulative number of entries removed by sweeps.
    pub deleted_count: u64,
}

/// One layer of the multi-tier cache.
///
/// Implementations must be thread-safe. Errors returned here never reach the
/// callers of the cache store; the store logs them and treats the tier as a
/// miss.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Which tier this is.
    fn kind(&self) -> TierKind;

    /// Read the entry stored under `key`, whatever its age or version.
    async fn read(&self, key: &RegionScopedKey) -> VitrineResult<Option<StoredEntry>>;

    /// Replace the entry stored under `key`.
    async fn write(&self, key: &RegionScopedKey, entry: &StoredEntry) -> VitrineResult<()>;

    /// Delete one entry. Returns whether it existed.
    async fn delete(&self, key: &RegionScopedKey) -> VitrineResult<bool>;

    /// Delete every entry of `region`. Returns the number deleted.
    async fn delete_region(&self, region: &CacheRegion) -> VitrineResult<u64>;

    /// Delete every cache-owned entry. Returns the number deleted.
    async fn clear(&self) -> VitrineResult<u64>;

    /// Delete entries older than their own TTL at `now` and return their keys.
    async fn sweep_expired(&self, now: EpochMillis) -> VitrineResult<Vec<RegionScopedKey>>;

    /// Number of entries currently held.
    async fn len(&self) -> VitrineResult<u64>;

    /// Read the cleanup bookkeeping slot, if this tier keeps one.
    async fn load_metadata(&self) -> VitrineResult<Option<CleanupMetadata>> {
        Ok(None)
    }

    /// Write the cleanup bookkeeping slot, if this tier keeps one.
    async fn store_metadata(&self, _metadata: &CleanupMetadata) -> VitrineResult<()> {
        Ok(())
    }
}

/// Live counters of the cache store. Diagnostic only.
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub memory_hits: AtomicU64,
    pub persistent_hits: AtomicU64,
    pub fallback_hits: AtomicU64,
    pub misses: AtomicU64,
    pub stale_served: AtomicU64,
    pub errors: AtomicU64,
    pub storage_errors: AtomicU64,
    pub sets: AtomicU64,
    pub removals: AtomicU64,
    pub background_refreshes: AtomicU64,
    pub expired_evictions: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn record_hit(&self, tier: TierKind) {
        let counter = match tier {
            TierKind::Memory => &self.memory_hits,
            TierKind::Persistent => &self.persistent_hits,
            TierKind::Fallback => &self.fallback_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot of the counters.
    pub fn snapshot(&self, memory_entries: u64) -> CacheStats {
        let memory_hits = self.memory_hits.load(Ordering::Relaxed);
        let persistent_hits = self.persistent_hits.load(Ordering::Relaxed);
        let fallback_hits = self.fallback_hits.load(Ordering::Relaxed);
        CacheStats {
            hits: memory_hits + persistent_hits + fallback_hits,
            memory_hits,
            persistent_hits,
            fallback_hits,
            misses: self.misses.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
            expired_evictions: self.expired_evictions.load(Ordering::Relaxed),
            memory_entries,
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Fresh hits across all tiers.
    pub hits: u64,
    pub memory_hits: u64,
    pub persistent_hits: u64,
    pub fallback_hits: u64,
    /// Reads that had to call the fetcher.
    pub misses: u64,
    /// Stale values returned while a refresh ran in the background.
    pub stale_served: u64,
    /// Fetcher failures.
    pub errors: u64,
    /// Tier failures absorbed by the store.
    pub storage_errors: u64,
    pub sets: u64,
    pub removals: u64,
    pub background_refreshes: u64,
    /// Entries removed by cleanup sweeps.
    pub expired_evictions: u64,
    /// Entries currently in the memory tier.
    pub memory_entries: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

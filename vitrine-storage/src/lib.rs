//! vitrine storage - the cache store
//!
//! A read-through, multi-tier cache for UI content. See [`cache`] for the
//! tier layout and freshness rules.

pub mod cache;

pub use cache::{
    CacheRead, CacheSource, CacheStats, CacheStore, CacheTier, CleanupReport, FileCacheBackend,
    GetOptions, LmdbCacheBackend, LmdbCacheError, MemoryTier, PreloadItem, PreloadReport,
    RegionScopedKey, SetOptions, StoredEntry,
};

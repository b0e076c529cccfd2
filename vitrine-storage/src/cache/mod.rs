//! Multi-tier cache with TTL, versioning and region invalidation.
//!
//! Values live in up to three tiers, checked in order:
//!
//! 1. [`MemoryTier`]: process-lifetime, LRU-bounded
//! 2. [`LmdbCacheBackend`]: survives restarts, indexed by write timestamp
//! 3. [`FileCacheBackend`]: a JSON document used when tier 2 is unavailable
//!
//! Every tier stores the same [`StoredEntry`] shape under a
//! [`RegionScopedKey`]. A key cannot be built without a region, so bulk
//! invalidation of a region is a prefix scan in every tier.
//!
//! # Freshness
//!
//! An entry is fresh while it is younger than its own TTL and its version
//! matches the version requested by the reader. Stale entries are only ever
//! served when the caller opts into refresh-ahead with
//! [`GetOptions::in_background`]; the read then returns immediately and the
//! refetch runs on a spawned task.
//!
//! # Profiles
//!
//! Reads in [`CacheRegion::PROFILES`](vitrine_core::CacheRegion::PROFILES)
//! always call the fetcher. The result is kept in memory only, for at most
//! the configured profile TTL.
//!
//! # Example
//!
//! ```ignore
//! let store = CacheStore::new(CacheConfig::default());
//! store.initialize().await?;
//!
//! let read = store
//!     .get_read(&CacheRegion::FEEDS, "home", fetch_home, GetOptions::new().in_background())
//!     .await?;
//! if read.is_refreshing() {
//!     tracing::debug!(staleness = ?read.staleness(), "served stale feed");
//! }
//! ```

pub mod cleanup;
pub mod file_backend;
pub mod freshness;
pub mod lmdb_backend;
pub mod memory;
pub mod options;
pub mod preload;
pub mod region_key;
pub mod store;
pub mod traits;
pub mod write_guard;

pub use cleanup::CleanupReport;
pub use file_backend::FileCacheBackend;
pub use freshness::{CacheRead, CacheSource};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::MemoryTier;
pub use options::{GetOptions, SetOptions};
pub use preload::{BoxedFetcher, PreloadItem, PreloadReport};
pub use region_key::RegionScopedKey;
pub use store::CacheStore;
pub use traits::{CacheCounters, CacheStats, CacheTier, CleanupMetadata, StoredEntry};
pub use write_guard::{WriteGuard, WritePermit};

//! Constants for vitrine
//!
//! Default values for the cache store and the loader. Configuration structs
//! fall back to these when an environment variable is absent.

// ============================================================================
// CACHE STORE
// ============================================================================

/// Default entry TTL in milliseconds (5 minutes)
pub const DEFAULT_CACHE_TTL_MS: u64 = 300_000;

/// Default entry version
pub const DEFAULT_CACHE_VERSION: u32 = 1;

/// Enforced TTL for profile entries in milliseconds (10 seconds)
pub const PROFILE_TTL_MS: u64 = 10_000;

/// Default capacity of the in-memory tier
pub const DEFAULT_MEMORY_CAPACITY: usize = 2_000;

/// Default LMDB map size in megabytes
pub const DEFAULT_PERSISTENT_MAP_SIZE_MB: usize = 64;

/// Default interval between cleanup sweeps in seconds (10 minutes)
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 600;

/// Minimum age of the last sweep before another one runs (1 hour)
pub const DEFAULT_CLEANUP_MIN_GAP_SECS: u64 = 3_600;

/// Number of preload items fetched concurrently
pub const DEFAULT_PRELOAD_BATCH_SIZE: usize = 5;

/// Delay between preload batches in milliseconds
pub const DEFAULT_PRELOAD_STAGGER_MS: u64 = 50;

/// Key prefix marking cache-owned documents in the fallback tier
pub const FALLBACK_KEY_PREFIX: &str = "vitrine:";

/// Separator between region and key in composite keys
pub const REGION_SEPARATOR: char = ':';

// ============================================================================
// LOADER
// ============================================================================

/// Default number of requests in flight at once
pub const DEFAULT_MAX_CONCURRENT: usize = 6;

/// Default prefetch batch size
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Concurrency on a slow network
pub const SLOW_MAX_CONCURRENT: usize = 2;

/// Prefetch batch size on a slow network
pub const SLOW_BATCH_SIZE: usize = 3;

/// Default per-request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default number of automatic retries
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default capacity of the memo window
pub const DEFAULT_MEMO_CAPACITY: usize = 500;

/// Default capacity of the visible-id set
pub const DEFAULT_VIEWPORT_CAPACITY: usize = 1_000;

/// Delay between prefetch batches in milliseconds
pub const DEFAULT_PREFETCH_STAGGER_MS: u64 = 100;

// ============================================================================
// NETWORK CLASSIFICATION
// ============================================================================

/// Downlink (Mbps) at or above which the network is fast
pub const FAST_DOWNLINK_MBPS: f64 = 5.0;

/// Downlink (Mbps) at or above which the network is medium
pub const MEDIUM_DOWNLINK_MBPS: f64 = 1.5;

/// Intersection ratio at which content counts as visible
pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.1;

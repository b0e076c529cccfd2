//! Configuration types
//!
//! Configuration is injected into the cache store and the loader at
//! construction. Every struct has defaults from [`crate::constants`], `with_*`
//! builders, and `from_env()` reading `VITRINE_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::{ConfigError, VitrineError, VitrineResult};

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| s.to_lowercase() != "false")
        .unwrap_or(default)
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> VitrineError {
    VitrineError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// ============================================================================
// CACHE STORE
// ============================================================================

/// Configuration for the tiered cache store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a read or write does not specify one.
    pub default_ttl: Duration,
    /// Version applied when a read or write does not specify one.
    pub default_version: u32,
    /// TTL enforced on profile entries regardless of the requested TTL.
    pub profile_ttl: Duration,
    /// Maximum number of entries held by the in-memory tier.
    pub memory_capacity: usize,
    /// Directory of the LMDB environment. No persistent tier when absent.
    pub persistent_path: Option<PathBuf>,
    /// LMDB map size in megabytes.
    pub persistent_map_size_mb: usize,
    /// JSON document backing the fallback tier. In-process only when absent.
    pub fallback_path: Option<PathBuf>,
    /// Whether `initialize()` starts the background cleanup task.
    pub cleanup_enabled: bool,
    /// How often the cleanup task wakes up.
    pub cleanup_interval: Duration,
    /// A sweep is skipped if the last one is younger than this.
    pub cleanup_min_gap: Duration,
    /// Number of preload items fetched concurrently.
    pub preload_batch_size: usize,
    /// Pause between preload batches.
    pub preload_stagger: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            default_version: DEFAULT_CACHE_VERSION,
            profile_ttl: Duration::from_millis(PROFILE_TTL_MS),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            persistent_path: None,
            persistent_map_size_mb: DEFAULT_PERSISTENT_MAP_SIZE_MB,
            fallback_path: None,
            cleanup_enabled: true,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            cleanup_min_gap: Duration::from_secs(DEFAULT_CLEANUP_MIN_GAP_SECS),
            preload_batch_size: DEFAULT_PRELOAD_BATCH_SIZE,
            preload_stagger: Duration::from_millis(DEFAULT_PRELOAD_STAGGER_MS),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `VITRINE_CACHE_DEFAULT_TTL_MS` (default: 300000)
    /// - `VITRINE_CACHE_DEFAULT_VERSION` (default: 1)
    /// - `VITRINE_CACHE_PROFILE_TTL_MS` (default: 10000)
    /// - `VITRINE_CACHE_MEMORY_CAPACITY` (default: 2000)
    /// - `VITRINE_CACHE_PERSISTENT_PATH` (default: unset, no persistent tier)
    /// - `VITRINE_CACHE_PERSISTENT_MAP_SIZE_MB` (default: 64)
    /// - `VITRINE_CACHE_FALLBACK_PATH` (default: unset, in-process fallback)
    /// - `VITRINE_CACHE_CLEANUP_ENABLED` (default: true)
    /// - `VITRINE_CACHE_CLEANUP_INTERVAL_SECS` (default: 600)
    /// - `VITRINE_CACHE_CLEANUP_MIN_GAP_SECS` (default: 3600)
    /// - `VITRINE_CACHE_PRELOAD_BATCH_SIZE` (default: 5)
    /// - `VITRINE_CACHE_PRELOAD_STAGGER_MS` (default: 50)
    pub fn from_env() -> Self {
        Self {
            default_ttl: Duration::from_millis(
                env_parse("VITRINE_CACHE_DEFAULT_TTL_MS").unwrap_or(DEFAULT_CACHE_TTL_MS),
            ),
            default_version: env_parse("VITRINE_CACHE_DEFAULT_VERSION")
                .unwrap_or(DEFAULT_CACHE_VERSION),
            profile_ttl: Duration::from_millis(
                env_parse("VITRINE_CACHE_PROFILE_TTL_MS").unwrap_or(PROFILE_TTL_MS),
            ),
            memory_capacity: env_parse("VITRINE_CACHE_MEMORY_CAPACITY")
                .unwrap_or(DEFAULT_MEMORY_CAPACITY),
            persistent_path: std::env::var("VITRINE_CACHE_PERSISTENT_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            persistent_map_size_mb: env_parse("VITRINE_CACHE_PERSISTENT_MAP_SIZE_MB")
                .unwrap_or(DEFAULT_PERSISTENT_MAP_SIZE_MB),
            fallback_path: std::env::var("VITRINE_CACHE_FALLBACK_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            cleanup_enabled: env_flag("VITRINE_CACHE_CLEANUP_ENABLED", true),
            cleanup_interval: Duration::from_secs(
                env_parse("VITRINE_CACHE_CLEANUP_INTERVAL_SECS")
                    .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECS),
            ),
            cleanup_min_gap: Duration::from_secs(
                env_parse("VITRINE_CACHE_CLEANUP_MIN_GAP_SECS")
                    .unwrap_or(DEFAULT_CLEANUP_MIN_GAP_SECS),
            ),
            preload_batch_size: env_parse("VITRINE_CACHE_PRELOAD_BATCH_SIZE")
                .unwrap_or(DEFAULT_PRELOAD_BATCH_SIZE),
            preload_stagger: Duration::from_millis(
                env_parse("VITRINE_CACHE_PRELOAD_STAGGER_MS").unwrap_or(DEFAULT_PRELOAD_STAGGER_MS),
            ),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_default_version(mut self, version: u32) -> Self {
        self.default_version = version;
        self
    }

    pub fn with_profile_ttl(mut self, ttl: Duration) -> Self {
        self.profile_ttl = ttl;
        self
    }

    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    pub fn with_persistent_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistent_path = Some(path.into());
        self
    }

    pub fn with_fallback_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.fallback_path = Some(path.into());
        self
    }

    pub fn with_cleanup(mut self, enabled: bool) -> Self {
        self.cleanup_enabled = enabled;
        self
    }

    pub fn with_cleanup_schedule(mut self, interval: Duration, min_gap: Duration) -> Self {
        self.cleanup_interval = interval;
        self.cleanup_min_gap = min_gap;
        self
    }

    pub fn with_preload(mut self, batch_size: usize, stagger: Duration) -> Self {
        self.preload_batch_size = batch_size;
        self.preload_stagger = stagger;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - TTLs and the memory capacity are positive
    /// - the profile TTL does not exceed the default TTL
    /// - the cleanup interval is positive when cleanup is enabled
    /// - the preload batch size is positive
    pub fn validate(&self) -> VitrineResult<()> {
        if self.default_ttl.is_zero() {
            return Err(invalid(
                "default_ttl",
                format!("{:?}", self.default_ttl),
                "default_ttl must be positive",
            ));
        }
        if self.profile_ttl.is_zero() {
            return Err(invalid(
                "profile_ttl",
                format!("{:?}", self.profile_ttl),
                "profile_ttl must be positive",
            ));
        }
        if self.profile_ttl > self.default_ttl {
            return Err(VitrineError::Config(ConfigError::IncompatibleOptions {
                option_a: "profile_ttl".to_string(),
                option_b: "default_ttl".to_string(),
            }));
        }
        if self.memory_capacity == 0 {
            return Err(invalid(
                "memory_capacity",
                self.memory_capacity,
                "memory_capacity must be greater than 0",
            ));
        }
        if self.persistent_map_size_mb == 0 {
            return Err(invalid(
                "persistent_map_size_mb",
                self.persistent_map_size_mb,
                "persistent_map_size_mb must be greater than 0",
            ));
        }
        if self.cleanup_enabled && self.cleanup_interval.is_zero() {
            return Err(invalid(
                "cleanup_interval",
                format!("{:?}", self.cleanup_interval),
                "cleanup_interval must be positive when cleanup is enabled",
            ));
        }
        if self.preload_batch_size == 0 {
            return Err(invalid(
                "preload_batch_size",
                self.preload_batch_size,
                "preload_batch_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// LOADER
// ============================================================================

/// What the loader does with a request whose retries are exhausted and
/// whose caller supplied no error callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Drop the request without a trace; callers must time out on their own.
    #[default]
    DropSilently,
    /// Drop the request and emit a warning.
    LogWarning,
}

impl FromStr for ExhaustedPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drop" | "drop_silently" => Ok(ExhaustedPolicy::DropSilently),
            "warn" | "log_warning" => Ok(ExhaustedPolicy::LogWarning),
            other => Err(ConfigError::InvalidValue {
                field: "exhausted_policy".to_string(),
                value: other.to_string(),
                reason: "expected drop_silently or log_warning".to_string(),
            }),
        }
    }
}

/// Configuration for the request scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Requests in flight at once on a fast or medium network.
    pub max_concurrent: usize,
    /// Prefetch batch size on a fast or medium network.
    pub batch_size: usize,
    /// Requests in flight at once on a slow network.
    pub slow_max_concurrent: usize,
    /// Prefetch batch size on a slow network.
    pub slow_batch_size: usize,
    /// Timeout for requests that do not set one. Falls back to the
    /// content type's own default when `None`.
    pub default_timeout: Option<Duration>,
    /// Automatic retries before a request is given up.
    pub max_retries: u32,
    /// Entries kept in the memo window.
    pub memo_capacity: usize,
    /// Ids remembered as visible.
    pub viewport_capacity: usize,
    /// Pause between prefetch batches.
    pub prefetch_stagger: Duration,
    pub exhausted_policy: ExhaustedPolicy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            batch_size: DEFAULT_BATCH_SIZE,
            slow_max_concurrent: SLOW_MAX_CONCURRENT,
            slow_batch_size: SLOW_BATCH_SIZE,
            default_timeout: None,
            max_retries: DEFAULT_MAX_RETRIES,
            memo_capacity: DEFAULT_MEMO_CAPACITY,
            viewport_capacity: DEFAULT_VIEWPORT_CAPACITY,
            prefetch_stagger: Duration::from_millis(DEFAULT_PREFETCH_STAGGER_MS),
            exhausted_policy: ExhaustedPolicy::default(),
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create LoaderConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `VITRINE_LOADER_MAX_CONCURRENT` (default: 6)
    /// - `VITRINE_LOADER_BATCH_SIZE` (default: 10)
    /// - `VITRINE_LOADER_SLOW_MAX_CONCURRENT` (default: 2)
    /// - `VITRINE_LOADER_SLOW_BATCH_SIZE` (default: 3)
    /// - `VITRINE_LOADER_TIMEOUT_MS` (default: unset, per content type)
    /// - `VITRINE_LOADER_MAX_RETRIES` (default: 3)
    /// - `VITRINE_LOADER_MEMO_CAPACITY` (default: 500)
    /// - `VITRINE_LOADER_VIEWPORT_CAPACITY` (default: 1000)
    /// - `VITRINE_LOADER_PREFETCH_STAGGER_MS` (default: 100)
    /// - `VITRINE_LOADER_EXHAUSTED_POLICY`: `drop_silently` or `log_warning`
    pub fn from_env() -> Self {
        Self {
            max_concurrent: env_parse("VITRINE_LOADER_MAX_CONCURRENT")
                .unwrap_or(DEFAULT_MAX_CONCURRENT),
            batch_size: env_parse("VITRINE_LOADER_BATCH_SIZE").unwrap_or(DEFAULT_BATCH_SIZE),
            slow_max_concurrent: env_parse("VITRINE_LOADER_SLOW_MAX_CONCURRENT")
                .unwrap_or(SLOW_MAX_CONCURRENT),
            slow_batch_size: env_parse("VITRINE_LOADER_SLOW_BATCH_SIZE")
                .unwrap_or(SLOW_BATCH_SIZE),
            default_timeout: env_parse::<u64>("VITRINE_LOADER_TIMEOUT_MS")
                .map(Duration::from_millis),
            max_retries: env_parse("VITRINE_LOADER_MAX_RETRIES").unwrap_or(DEFAULT_MAX_RETRIES),
            memo_capacity: env_parse("VITRINE_LOADER_MEMO_CAPACITY")
                .unwrap_or(DEFAULT_MEMO_CAPACITY),
            viewport_capacity: env_parse("VITRINE_LOADER_VIEWPORT_CAPACITY")
                .unwrap_or(DEFAULT_VIEWPORT_CAPACITY),
            prefetch_stagger: Duration::from_millis(
                env_parse("VITRINE_LOADER_PREFETCH_STAGGER_MS")
                    .unwrap_or(DEFAULT_PREFETCH_STAGGER_MS),
            ),
            exhausted_policy: env_parse("VITRINE_LOADER_EXHAUSTED_POLICY").unwrap_or_default(),
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_slow_limits(mut self, max_concurrent: usize, batch_size: usize) -> Self {
        self.slow_max_concurrent = max_concurrent;
        self.slow_batch_size = batch_size;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_memo_capacity(mut self, capacity: usize) -> Self {
        self.memo_capacity = capacity;
        self
    }

    pub fn with_viewport_capacity(mut self, capacity: usize) -> Self {
        self.viewport_capacity = capacity;
        self
    }

    pub fn with_prefetch_stagger(mut self, stagger: Duration) -> Self {
        self.prefetch_stagger = stagger;
        self
    }

    pub fn with_exhausted_policy(mut self, policy: ExhaustedPolicy) -> Self {
        self.exhausted_policy = policy;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - concurrency limits and batch sizes are positive
    /// - slow-network limits do not exceed the normal limits
    /// - capacities are positive
    /// - an explicit default timeout is positive
    pub fn validate(&self) -> VitrineResult<()> {
        if self.max_concurrent == 0 {
            return Err(invalid(
                "max_concurrent",
                self.max_concurrent,
                "max_concurrent must be greater than 0",
            ));
        }
        if self.batch_size == 0 {
            return Err(invalid(
                "batch_size",
                self.batch_size,
                "batch_size must be greater than 0",
            ));
        }
        if self.slow_max_concurrent == 0 || self.slow_max_concurrent > self.max_concurrent {
            return Err(invalid(
                "slow_max_concurrent",
                self.slow_max_concurrent,
                "slow_max_concurrent must be between 1 and max_concurrent",
            ));
        }
        if self.slow_batch_size == 0 || self.slow_batch_size > self.batch_size {
            return Err(invalid(
                "slow_batch_size",
                self.slow_batch_size,
                "slow_batch_size must be between 1 and batch_size",
            ));
        }
        if self.memo_capacity == 0 {
            return Err(invalid(
                "memo_capacity",
                self.memo_capacity,
                "memo_capacity must be greater than 0",
            ));
        }
        if self.viewport_capacity == 0 {
            return Err(invalid(
                "viewport_capacity",
                self.viewport_capacity,
                "viewport_capacity must be greater than 0",
            ));
        }
        if let Some(timeout) = self.default_timeout {
            if timeout.is_zero() {
                return Err(invalid(
                    "default_timeout",
                    format!("{:?}", timeout),
                    "default_timeout must be positive",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VitrineConfig {
    pub cache: CacheConfig,
    pub loader: LoaderConfig,
}

impl VitrineConfig {
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            loader: LoaderConfig::from_env(),
        }
    }

    pub fn validate(&self) -> VitrineResult<()> {
        self.cache.validate()?;
        self.loader.validate()
    }
}

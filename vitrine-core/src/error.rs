//! Error types for vitrine operations

use crate::ContentType;
use thiserror::Error;

/// Which cache tier an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TierKind {
    Memory,
    Persistent,
    Fallback,
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TierKind::Memory => "memory",
            TierKind::Persistent => "persistent",
            TierKind::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// Cache tier errors.
///
/// These never reach UI code: the cache store logs them and treats the
/// affected tier as a miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Tier {tier} is unavailable: {reason}")]
    TierUnavailable { tier: TierKind, reason: String },

    #[error("Read from {tier} tier failed: {reason}")]
    ReadFailed { tier: TierKind, reason: String },

    #[error("Write to {tier} tier failed: {reason}")]
    WriteFailed { tier: TierKind, reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {reason}")]
    Io { reason: String },
}

/// Fetch errors raised by content fetchers or the scheduler around them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fetch failed for {content_type}: {reason}")]
    Failed {
        content_type: ContentType,
        reason: String,
    },

    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    Timeout { request_id: String, timeout_ms: u64 },

    #[error("No fetcher registered for {content_type}")]
    Unsupported { content_type: ContentType },

    #[error("Request {request_id} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        request_id: String,
        attempts: u32,
        last_error: String,
    },

    /// Raised by ad-hoc fetchers passed to the cache store.
    #[error("Origin fetch failed: {reason}")]
    Origin { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Validation errors for caller-supplied identifiers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid region name {name:?}: {reason}")]
    InvalidRegion { name: String, reason: String },

    #[error("Cache key must not be empty")]
    EmptyKey,
}

/// Master error type for all vitrine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VitrineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl VitrineError {
    /// Shorthand for an origin failure raised by an ad-hoc fetcher.
    pub fn origin(reason: impl Into<String>) -> Self {
        VitrineError::Fetch(FetchError::Origin {
            reason: reason.into(),
        })
    }

    /// Returns true if this error came from a timed out request.
    pub fn is_timeout(&self) -> bool {
        matches!(self, VitrineError::Fetch(FetchError::Timeout { .. }))
    }

    /// False for failures another attempt cannot fix.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            VitrineError::Fetch(FetchError::Unsupported { .. })
                | VitrineError::Validation(_)
                | VitrineError::Config(_)
        )
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io {
            reason: e.to_string(),
        }
    }
}

/// Result type alias for vitrine operations.
pub type VitrineResult<T> = Result<T, VitrineError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_write_failed() {
        let err = StorageError::WriteFailed {
            tier: TierKind::Persistent,
            reason: "map full".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("persistent"));
        assert!(msg.contains("map full"));
    }

    #[test]
    fn test_fetch_error_display_timeout() {
        let err = FetchError::Timeout {
            request_id: "product:abc".to_string(),
            timeout_ms: 1500,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("product:abc"));
        assert!(msg.contains("1500"));
    }

    #[test]
    fn test_fetch_error_display_unsupported() {
        let err = FetchError::Unsupported {
            content_type: ContentType::Reviews,
        };
        assert!(format!("{}", err).contains("reviews"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "max_concurrent".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("max_concurrent"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_vitrine_error_from_variants() {
        let storage = VitrineError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, VitrineError::Storage(_)));

        let fetch = VitrineError::from(FetchError::Unsupported {
            content_type: ContentType::Feed,
        });
        assert!(matches!(fetch, VitrineError::Fetch(_)));

        let config = VitrineError::from(ConfigError::MissingRequired {
            field: "persistent_path".to_string(),
        });
        assert!(matches!(config, VitrineError::Config(_)));

        let validation = VitrineError::from(ValidationError::EmptyKey);
        assert!(matches!(validation, VitrineError::Validation(_)));
    }

    #[test]
    fn test_is_timeout() {
        let timeout = VitrineError::from(FetchError::Timeout {
            request_id: "feed:1".to_string(),
            timeout_ms: 10,
        });
        assert!(timeout.is_timeout());
        assert!(!VitrineError::origin("boom").is_timeout());
    }

    #[test]
    fn test_is_retryable() {
        assert!(VitrineError::origin("boom").is_retryable());
        assert!(!VitrineError::from(FetchError::Unsupported {
            content_type: ContentType::Reviews,
        })
        .is_retryable());
        assert!(!VitrineError::from(ValidationError::EmptyKey).is_retryable());
    }

    #[test]
    fn test_serde_json_error_converts_to_storage_error() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let storage: StorageError = err.into();
        assert!(matches!(storage, StorageError::Serialization { .. }));
    }
}

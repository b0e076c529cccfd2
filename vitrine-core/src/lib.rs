//! vitrine core - shared types
//!
//! Data types, errors and configuration shared by the cache store
//! (`vitrine-storage`) and the request scheduler (`vitrine-loader`).
//! This crate contains no I/O.

pub mod config;
pub mod constants;
pub mod content;
pub mod entry;
pub mod error;
pub mod network;
pub mod region;

pub use config::{CacheConfig, ExhaustedPolicy, LoaderConfig, VitrineConfig};
pub use content::{
    CommentsQuery, ContentType, FeedQuery, ListQuery, LoadParams, LoadPriority, ProductParams,
    ProfileParams, ReviewsQuery, SortDirection, UserRecordParams,
};
pub use entry::{now_millis, CacheEntry, EpochMillis, Staleness};
pub use error::{
    ConfigError, FetchError, StorageError, TierKind, ValidationError, VitrineError, VitrineResult,
};
pub use network::NetworkQuality;
pub use region::CacheRegion;

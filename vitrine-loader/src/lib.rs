//! vitrine loader - the request scheduler
//!
//! A generic "priority queue + concurrency limiter + memo + retry" engine
//! for UI content. It decides when and in what order content is fetched;
//! what a fetch does is left to a [`ContentFetcher`].
//!
//! - [`FastLoader`]: the scheduler
//! - [`NetworkMonitor`]: classifies connectivity readings for the loader
//! - [`VisibilityTracker`]: turns intersection ratios into viewport marks

pub mod fetcher;
mod memo;
pub mod network;
mod queue;
pub mod request;
pub mod scheduler;
pub mod stats;
pub mod viewport;

pub use fetcher::{dispatch, ContentFetcher};
pub use network::NetworkMonitor;
pub use request::{ErrorCallback, LoadRequest, LoadSource, Loaded, RequestId, SuccessCallback};
pub use scheduler::FastLoader;
pub use stats::{LoaderStats, LoaderStatsSnapshot};
pub use viewport::VisibilityTracker;

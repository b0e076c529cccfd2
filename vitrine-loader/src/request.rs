//! Load requests, their identity and their callbacks.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use vitrine_core::{ContentType, LoadParams, LoadPriority, VitrineError};

/// Hex characters of the params digest kept in a request id.
const DIGEST_LEN: usize = 16;

/// Identity of a load: content type plus a digest of its params.
///
/// Two loads with equal params share an id, which is what lets the loader
/// coalesce them and serve one from the other's memo entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Compute the id for `params`.
    ///
    /// The digest is SHA-256 over the canonical JSON of the params. Filter
    /// maps are ordered, so logically equal queries hash the same.
    pub fn for_params(params: &LoadParams) -> Self {
        let canonical = serde_json::to_vec(params).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        let digest = hex::encode(hasher.finalize());
        Self(format!(
            "{}:{}",
            params.content_type(),
            &digest[..DIGEST_LEN]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&LoadParams> for RequestId {
    fn from(params: &LoadParams) -> Self {
        Self::for_params(params)
    }
}

/// Where a delivered payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    /// A fetch that just completed.
    Network,
    /// A memoized result still inside its window.
    Memo,
}

/// A successfully loaded payload, as delivered to success callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub id: RequestId,
    pub data: serde_json::Value,
    /// Retries the request needed before it succeeded.
    pub retry_count: u32,
    pub source: LoadSource,
}

pub type SuccessCallback = Box<dyn FnOnce(Loaded) + Send>;
pub type ErrorCallback = Box<dyn FnOnce(VitrineError) + Send>;

/// The callbacks of one caller waiting on a request.
#[derive(Default)]
pub(crate) struct Subscriber {
    pub(crate) on_success: Option<SuccessCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A load submitted to the [`FastLoader`](crate::FastLoader).
///
/// # Example
///
/// ```ignore
/// let id = loader.load(
///     LoadRequest::new(LoadParams::product("p-42"))
///         .with_priority(LoadPriority::High)
///         .on_success(|loaded| render(loaded.data))
///         .on_error(|e| tracing::warn!(error = %e, "product unavailable")),
/// );
/// ```
pub struct LoadRequest {
    pub(crate) params: LoadParams,
    pub(crate) priority: LoadPriority,
    pub(crate) timeout: Option<Duration>,
    pub(crate) ttl: Option<Duration>,
    pub(crate) force_refresh: bool,
    pub(crate) subscriber: Subscriber,
}

impl LoadRequest {
    pub fn new(params: LoadParams) -> Self {
        Self {
            params,
            priority: LoadPriority::default(),
            timeout: None,
            ttl: None,
            force_refresh: false,
            subscriber: Subscriber::default(),
        }
    }

    pub fn with_priority(mut self, priority: LoadPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the memo window. Zero disables memoization.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Ignore any memoized result.
    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Loaded) + Send + 'static,
    {
        self.subscriber.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(VitrineError) + Send + 'static,
    {
        self.subscriber.on_error = Some(Box::new(callback));
        self
    }

    pub fn params(&self) -> &LoadParams {
        &self.params
    }

    pub fn priority(&self) -> LoadPriority {
        self.priority
    }

    pub fn content_type(&self) -> ContentType {
        self.params.content_type()
    }

    pub fn id(&self) -> RequestId {
        RequestId::for_params(&self.params)
    }
}

impl fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRequest")
            .field("params", &self.params)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("ttl", &self.ttl)
            .field("force_refresh", &self.force_refresh)
            .field("subscriber", &self.subscriber)
            .finish()
    }
}

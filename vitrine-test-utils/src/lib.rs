//! vitrine test utilities
//!
//! Shared test infrastructure for the vitrine workspace:
//! - tracing initialisation driven by `RUST_LOG`
//! - a scriptable [`MockFetcher`] for the loader
//! - [`CallbackRecorder`] to observe loader callbacks from async tests
//! - [`FailingTier`] to exercise cache degradation
//! - [`SlowTier`] to widen races between concurrent writes
//! - proptest generators for core types

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub use vitrine_core::{
    CacheConfig, CacheEntry, CacheRegion, CommentsQuery, ContentType, FeedQuery, FetchError,
    ListQuery, LoadParams, LoadPriority, LoaderConfig, NetworkQuality, ProductParams,
    ProfileParams, ReviewsQuery, StorageError, TierKind, UserRecordParams, VitrineError,
    VitrineResult,
};
pub use vitrine_loader::{ContentFetcher, FastLoader, LoadRequest, Loaded, RequestId};
pub use vitrine_storage::cache::{CacheTier, CleanupMetadata, RegionScopedKey, StoredEntry};

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a fmt subscriber filtered by `RUST_LOG` (default `warn`).
/// Safe to call from every test.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// MOCK FETCHER
// ============================================================================

#[derive(Debug, Default)]
struct Script {
    calls: Vec<RequestId>,
    failures: HashMap<RequestId, u32>,
    responses: HashMap<RequestId, Value>,
    delays: HashMap<RequestId, Duration>,
}

/// Content fetcher with scripted behavior per request id.
///
/// Unscripted requests succeed immediately with
/// `{"type": <content type>, "params": <params>}`.
#[derive(Debug, Default)]
pub struct MockFetcher {
    script: Mutex<Script>,
    default_delay: Option<Duration>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Fail the next `times` fetches of `params`.
    pub fn fail_times(&self, params: &LoadParams, times: u32) {
        self.script()
            .failures
            .insert(RequestId::for_params(params), times);
    }

    /// Fail every fetch of `params`.
    pub fn always_fail(&self, params: &LoadParams) {
        self.fail_times(params, u32::MAX);
    }

    pub fn respond_with(&self, params: &LoadParams, value: Value) {
        self.script()
            .responses
            .insert(RequestId::for_params(params), value);
    }

    /// Delay fetches of `params`, e.g. past their timeout.
    pub fn delay(&self, params: &LoadParams, delay: Duration) {
        self.script()
            .delays
            .insert(RequestId::for_params(params), delay);
    }

    /// Ids fetched so far, in call order.
    pub fn calls(&self) -> Vec<RequestId> {
        self.script().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.script().calls.len()
    }

    pub fn calls_for(&self, params: &LoadParams) -> usize {
        let id = RequestId::for_params(params);
        self.script().calls.iter().filter(|c| **c == id).count()
    }

    async fn respond(&self, params: LoadParams) -> VitrineResult<Value> {
        let id = RequestId::for_params(&params);
        let (delay, fail, response) = {
            let mut script = self.script();
            script.calls.push(id.clone());
            let delay = script.delays.get(&id).copied().or(self.default_delay);
            let fail = match script.failures.get_mut(&id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining = remaining.saturating_sub(1);
                    true
                }
                _ => false,
            };
            (delay, fail, script.responses.get(&id).cloned())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(FetchError::Failed {
                content_type: params.content_type(),
                reason: format!("scripted failure for {}", id),
            }
            .into());
        }
        Ok(response.unwrap_or_else(|| {
            json!({
                "type": params.content_type().as_str(),
                "params": serde_json::to_value(&params).unwrap_or(Value::Null),
            })
        }))
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch_profile(&self, params: &ProfileParams) -> VitrineResult<Value> {
        self.respond(LoadParams::Profile(params.clone())).await
    }

    async fn fetch_product(&self, params: &ProductParams) -> VitrineResult<Value> {
        self.respond(LoadParams::Product(params.clone())).await
    }

    async fn fetch_products_list(&self, query: &ListQuery) -> VitrineResult<Value> {
        self.respond(LoadParams::ProductsList(query.clone())).await
    }

    async fn fetch_feed(&self, query: &FeedQuery) -> VitrineResult<Value> {
        self.respond(LoadParams::Feed(query.clone())).await
    }

    async fn fetch_comments(&self, query: &CommentsQuery) -> VitrineResult<Value> {
        self.respond(LoadParams::Comments(query.clone())).await
    }

    async fn fetch_reviews(&self, query: &ReviewsQuery) -> VitrineResult<Value> {
        self.respond(LoadParams::Reviews(query.clone())).await
    }

    async fn fetch_user_record(&self, params: &UserRecordParams) -> VitrineResult<Value> {
        self.respond(LoadParams::UserRecord(params.clone())).await
    }
}

// ============================================================================
// CALLBACK RECORDER
// ============================================================================

/// What a loader callback reported.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Loaded),
    Failure(VitrineError),
}

impl Outcome {
    pub fn loaded(self) -> Option<Loaded> {
        match self {
            Outcome::Success(loaded) => Some(loaded),
            Outcome::Failure(_) => None,
        }
    }

    pub fn error(self) -> Option<VitrineError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }
}

/// Collects callback invocations on a channel.
#[derive(Debug)]
pub struct CallbackRecorder {
    sender: mpsc::UnboundedSender<Outcome>,
    receiver: mpsc::UnboundedReceiver<Outcome>,
}

impl Default for CallbackRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRecorder {
    /// How long [`CallbackRecorder::next`] waits before giving up.
    pub const WAIT: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    /// Attach success and error callbacks to `request`.
    pub fn attach(&self, request: LoadRequest) -> LoadRequest {
        let on_success = self.sender.clone();
        let on_error = self.sender.clone();
        request
            .on_success(move |loaded| {
                let _ = on_success.send(Outcome::Success(loaded));
            })
            .on_error(move |e| {
                let _ = on_error.send(Outcome::Failure(e));
            })
    }

    /// A standalone success callback, for the `load_*` shorthands.
    pub fn success_callback(&self) -> impl FnOnce(Loaded) + Send + 'static {
        let sender = self.sender.clone();
        move |loaded| {
            let _ = sender.send(Outcome::Success(loaded));
        }
    }

    /// Attach only a success callback.
    pub fn attach_success(&self, request: LoadRequest) -> LoadRequest {
        request.on_success(self.success_callback())
    }

    /// The next callback, or `None` after [`CallbackRecorder::WAIT`].
    pub async fn next(&mut self) -> Option<Outcome> {
        tokio::time::timeout(Self::WAIT, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// A callback that already fired, without waiting.
    pub fn try_next(&mut self) -> Option<Outcome> {
        self.receiver.try_recv().ok()
    }
}

// ============================================================================
// FAILING TIER
// ============================================================================

/// A cache tier where every operation fails.
#[derive(Debug)]
pub struct FailingTier {
    kind: TierKind,
    attempts: AtomicU64,
}

impl FailingTier {
    pub fn new(kind: TierKind) -> Self {
        Self {
            kind,
            attempts: AtomicU64::new(0),
        }
    }

    /// Operations attempted against this tier.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> VitrineResult<T> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::TierUnavailable {
            tier: self.kind,
            reason: "tier is broken".to_string(),
        }
        .into())
    }
}

#[async_trait]
impl CacheTier for FailingTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn read(&self, _key: &RegionScopedKey) -> VitrineResult<Option<StoredEntry>> {
        self.fail()
    }

    async fn write(&self, _key: &RegionScopedKey, _entry: &StoredEntry) -> VitrineResult<()> {
        self.fail()
    }

    async fn delete(&self, _key: &RegionScopedKey) -> VitrineResult<bool> {
        self.fail()
    }

    async fn delete_region(&self, _region: &CacheRegion) -> VitrineResult<u64> {
        self.fail()
    }

    async fn clear(&self) -> VitrineResult<u64> {
        self.fail()
    }

    async fn sweep_expired(&self, _now: i64) -> VitrineResult<Vec<RegionScopedKey>> {
        self.fail()
    }

    async fn len(&self) -> VitrineResult<u64> {
        self.fail()
    }

    async fn load_metadata(&self) -> VitrineResult<Option<CleanupMetadata>> {
        self.fail()
    }

    async fn store_metadata(&self, _metadata: &CleanupMetadata) -> VitrineResult<()> {
        self.fail()
    }
}

// ============================================================================
// SLOW TIER
// ============================================================================

/// Wraps a tier and delays its writes, alternating a long and a short
/// delay so that concurrent writes finish out of order.
pub struct SlowTier {
    inner: Arc<dyn CacheTier>,
    delay: Duration,
    writes: AtomicU64,
}

impl SlowTier {
    pub fn new(inner: Arc<dyn CacheTier>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            writes: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl CacheTier for SlowTier {
    fn kind(&self) -> TierKind {
        self.inner.kind()
    }

    async fn read(&self, key: &RegionScopedKey) -> VitrineResult<Option<StoredEntry>> {
        self.inner.read(key).await
    }

    async fn write(&self, key: &RegionScopedKey, entry: &StoredEntry) -> VitrineResult<()> {
        let delay = if self.writes.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            self.delay
        } else {
            Duration::from_millis(1)
        };
        tokio::time::sleep(delay).await;
        self.inner.write(key, entry).await
    }

    async fn delete(&self, key: &RegionScopedKey) -> VitrineResult<bool> {
        self.inner.delete(key).await
    }

    async fn delete_region(&self, region: &CacheRegion) -> VitrineResult<u64> {
        self.inner.delete_region(region).await
    }

    async fn clear(&self) -> VitrineResult<u64> {
        self.inner.clear().await
    }

    async fn sweep_expired(&self, now: i64) -> VitrineResult<Vec<RegionScopedKey>> {
        self.inner.sweep_expired(now).await
    }

    async fn len(&self) -> VitrineResult<u64> {
        self.inner.len().await
    }

    async fn load_metadata(&self) -> VitrineResult<Option<CleanupMetadata>> {
        self.inner.load_metadata().await
    }

    async fn store_metadata(&self, metadata: &CleanupMetadata) -> VitrineResult<()> {
        self.inner.store_metadata(metadata).await
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_priority() -> impl Strategy<Value = LoadPriority> {
        prop_oneof![
            Just(LoadPriority::Critical),
            Just(LoadPriority::High),
            Just(LoadPriority::Medium),
            Just(LoadPriority::Low),
            Just(LoadPriority::Lazy),
        ]
    }

    pub fn arb_region() -> impl Strategy<Value = CacheRegion> {
        prop_oneof![
            Just(CacheRegion::PRODUCTS),
            Just(CacheRegion::SETTINGS),
            Just(CacheRegion::LISTS),
            Just(CacheRegion::FEEDS),
            "[a-z_]{1,12}".prop_filter_map("valid region", |name| CacheRegion::custom(name).ok()),
        ]
    }

    pub fn arb_cache_key() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9:_-]{1,32}"
    }

    pub fn arb_load_params() -> impl Strategy<Value = LoadParams> {
        prop_oneof![
            "[a-z0-9]{1,8}".prop_map(LoadParams::profile),
            "[a-z0-9]{1,8}".prop_map(LoadParams::product),
            (1u32..100).prop_map(|limit| LoadParams::ProductsList(ListQuery::new(limit))),
            ("[a-z0-9]{1,8}", 1u32..50).prop_map(|(target_id, limit)| {
                LoadParams::Comments(CommentsQuery { target_id, limit })
            }),
        ]
    }
}

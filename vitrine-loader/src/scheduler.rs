//! The fast loader: a priority queue in front of a bounded pool of fetches.
//!
//! Every load gets a [`RequestId`] from its params. A load whose id has a
//! live memo entry is answered on the spot. Otherwise it joins the queue (or
//! an identical request that is already queued or in flight) and the queue
//! head is dispatched whenever fewer than `max_concurrent` fetches run.
//!
//! Each dispatched fetch races its timeout on a spawned task. Failures are
//! requeued with one more retry and at least `High` priority until
//! `max_retries` is spent; after that the error goes to the request's error
//! callbacks, if any.
//!
//! State lives behind one mutex that is never held across an await or while
//! a callback runs.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use lru::LruCache;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vitrine_core::{
    now_millis, ExhaustedPolicy, FeedQuery, FetchError, ListQuery, LoadParams, LoadPriority,
    LoaderConfig, NetworkQuality, VitrineError, VitrineResult,
};

use crate::fetcher::{dispatch, ContentFetcher};
use crate::memo::MemoCache;
use crate::queue::{QueuedRequest, RequestQueue};
use crate::request::{LoadRequest, LoadSource, Loaded, RequestId, Subscriber};
use crate::stats::{LoaderStats, LoaderStatsSnapshot, RuntimeState};

struct LoaderState {
    running: bool,
    queue: RequestQueue,
    in_flight: HashMap<RequestId, Vec<Subscriber>>,
    memo: MemoCache,
    visible: LruCache<RequestId, ()>,
    quality: NetworkQuality,
    max_concurrent: usize,
    batch_size: usize,
}

impl LoaderState {
    fn resort(&mut self) {
        let LoaderState { queue, visible, .. } = self;
        queue.sort(|id| visible.contains(id));
    }

    fn can_dispatch(&self) -> bool {
        self.running && !self.quality.is_offline() && self.in_flight.len() < self.max_concurrent
    }
}

struct LoaderInner {
    fetcher: Arc<dyn ContentFetcher>,
    config: LoaderConfig,
    state: Mutex<LoaderState>,
    stats: LoaderStats,
    network_watcher: Mutex<Option<JoinHandle<()>>>,
}

/// Priority-ordered, concurrency-limited content loader.
///
/// Cheap to clone; clones share the queue. Dispatch needs a Tokio runtime;
/// loads submitted outside one stay queued until the next load, completion
/// or network change made from inside a runtime.
///
/// # Example
///
/// ```ignore
/// let loader = FastLoader::new(Arc::new(ApiFetcher::new(client)), LoaderConfig::default());
/// loader.initialize()?;
///
/// let id = loader.load_product("p-42", LoadPriority::High, |loaded| {
///     render_product(loaded.data);
/// });
/// loader.mark_in_viewport(&id, true);
/// ```
#[derive(Clone)]
pub struct FastLoader {
    inner: Arc<LoaderInner>,
}

impl FastLoader {
    /// Create a loader. Requests are accepted immediately but held until
    /// [`FastLoader::initialize`].
    pub fn new(fetcher: Arc<dyn ContentFetcher>, config: LoaderConfig) -> Self {
        let state = LoaderState {
            running: false,
            queue: RequestQueue::new(),
            in_flight: HashMap::new(),
            memo: MemoCache::new(config.memo_capacity),
            visible: LruCache::new(
                NonZeroUsize::new(config.viewport_capacity).unwrap_or(NonZeroUsize::MIN),
            ),
            quality: NetworkQuality::default(),
            max_concurrent: config.max_concurrent,
            batch_size: config.batch_size,
        };
        Self {
            inner: Arc::new(LoaderInner {
                fetcher,
                config,
                state: Mutex::new(state),
                stats: LoaderStats::default(),
                network_watcher: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    fn state(&self) -> MutexGuard<'_, LoaderState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start dispatching, including anything queued so far.
    pub fn initialize(&self) -> VitrineResult<()> {
        self.inner.config.validate()?;
        let queued = {
            let mut state = self.state();
            state.running = true;
            state.queue.len()
        };
        info!(
            max_concurrent = self.inner.config.max_concurrent,
            max_retries = self.inner.config.max_retries,
            queued,
            "Fast loader initialized"
        );
        self.pump();
        Ok(())
    }

    /// Stop dispatching, drop memoized results and detach the network
    /// watcher.
    ///
    /// Queued requests are kept; in-flight fetches run to completion.
    pub fn shutdown(&self) {
        {
            let mut state = self.state();
            state.running = false;
            state.memo.clear();
        }
        let watcher = self
            .inner
            .network_watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        info!("Fast loader shut down");
    }

    /// Submit a load. Returns its id.
    ///
    /// A live memo entry is delivered to the success callback before this
    /// returns, with no fetch.
    pub fn load(&self, request: LoadRequest) -> RequestId {
        let LoadRequest {
            params,
            priority,
            timeout,
            ttl,
            force_refresh,
            subscriber,
        } = request;
        let id = RequestId::for_params(&params);
        LoaderStats::bump(&self.inner.stats.requests);

        let mut state = self.state();

        if !force_refresh {
            if let Some(data) = state.memo.get(&id) {
                drop(state);
                LoaderStats::bump(&self.inner.stats.memo_hits);
                debug!(id = %id, "Memo hit");
                if let Some(on_success) = subscriber.on_success {
                    on_success(Loaded {
                        id: id.clone(),
                        data,
                        retry_count: 0,
                        source: LoadSource::Memo,
                    });
                }
                return id;
            }
        }

        if let Some(subscribers) = state.in_flight.get_mut(&id) {
            subscribers.push(subscriber);
            drop(state);
            LoaderStats::bump(&self.inner.stats.coalesced);
            debug!(id = %id, "Joined in-flight request");
            return id;
        }

        if let Some(queued) = state.queue.get_mut(&id) {
            queued.subscribers.push(subscriber);
            queued.priority = queued.priority.min(priority);
            state.resort();
            drop(state);
            LoaderStats::bump(&self.inner.stats.coalesced);
            debug!(id = %id, "Joined queued request");
            return id;
        }

        let content_type = params.content_type();
        let timeout = timeout
            .or(self.inner.config.default_timeout)
            .unwrap_or_else(|| content_type.default_timeout());
        let ttl = ttl.unwrap_or_else(|| content_type.default_memo_ttl());
        let mut queued =
            QueuedRequest::new(id.clone(), params, priority, timeout, ttl, now_millis());
        queued.subscribers.push(subscriber);
        state.queue.push(queued);
        state.resort();
        drop(state);

        LoaderStats::bump(&self.inner.stats.misses);
        debug!(id = %id, priority = ?priority, "Request queued");
        self.pump();
        id
    }

    pub fn load_profile<F>(
        &self,
        user_id: impl Into<String>,
        priority: LoadPriority,
        on_success: F,
    ) -> RequestId
    where
        F: FnOnce(Loaded) + Send + 'static,
    {
        self.load(
            LoadRequest::new(LoadParams::profile(user_id))
                .with_priority(priority)
                .on_success(on_success),
        )
    }

    pub fn load_product<F>(
        &self,
        product_id: impl Into<String>,
        priority: LoadPriority,
        on_success: F,
    ) -> RequestId
    where
        F: FnOnce(Loaded) + Send + 'static,
    {
        self.load(
            LoadRequest::new(LoadParams::product(product_id))
                .with_priority(priority)
                .on_success(on_success),
        )
    }

    pub fn load_products_list<F>(
        &self,
        query: ListQuery,
        priority: LoadPriority,
        on_success: F,
    ) -> RequestId
    where
        F: FnOnce(Loaded) + Send + 'static,
    {
        self.load(
            LoadRequest::new(LoadParams::ProductsList(query))
                .with_priority(priority)
                .on_success(on_success),
        )
    }

    pub fn load_feed<F>(&self, query: FeedQuery, priority: LoadPriority, on_success: F) -> RequestId
    where
        F: FnOnce(Loaded) + Send + 'static,
    {
        self.load(
            LoadRequest::new(LoadParams::Feed(query))
                .with_priority(priority)
                .on_success(on_success),
        )
    }

    /// Remove a request that has not been dispatched yet.
    ///
    /// Its callbacks are dropped without being called. In-flight requests
    /// cannot be cancelled; returns false for them and for unknown ids.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        let removed = self.state().queue.remove(id);
        match removed {
            Some(_) => {
                LoaderStats::bump(&self.inner.stats.cancelled);
                debug!(id = %id, "Request cancelled");
                true
            }
            None => false,
        }
    }

    /// Record whether `id` is visible.
    ///
    /// Marking visible raises an already queued request to at least `High`
    /// and re-sorts the queue.
    pub fn mark_in_viewport(&self, id: &RequestId, in_viewport: bool) {
        let mut state = self.state();
        if in_viewport {
            state.visible.put(id.clone(), ());
            if state.queue.promote(id, LoadPriority::High) {
                debug!(id = %id, "Queued request promoted by viewport");
            }
        } else {
            state.visible.pop(id);
        }
        state.resort();
    }

    pub fn is_in_viewport(&self, id: &RequestId) -> bool {
        self.state().visible.contains(id)
    }

    /// Warm the memo for `params` at the lowest priority.
    pub fn prefetch(&self, params: LoadParams) -> RequestId {
        self.load(LoadRequest::new(params).with_priority(LoadPriority::Lazy))
    }

    /// Prefetch in chunks of the current batch size, pausing
    /// `prefetch_stagger` between chunks.
    pub async fn prefetch_batch(&self, params: Vec<LoadParams>) -> Vec<RequestId> {
        let mut ids = Vec::with_capacity(params.len());
        let mut pending = params.into_iter().peekable();
        while pending.peek().is_some() {
            let batch_size = self.state().batch_size.max(1);
            for params in pending.by_ref().take(batch_size) {
                ids.push(self.prefetch(params));
            }
            if pending.peek().is_some() && !self.inner.config.prefetch_stagger.is_zero() {
                tokio::time::sleep(self.inner.config.prefetch_stagger).await;
            }
        }
        ids
    }

    /// Apply a network quality class.
    ///
    /// `Slow` lowers concurrency and batch size to the slow limits; any other
    /// class restores the defaults. `Offline` holds dispatch without touching
    /// the queue.
    pub fn set_network_quality(&self, quality: NetworkQuality) {
        {
            let mut state = self.state();
            if state.quality == quality {
                return;
            }
            let config = &self.inner.config;
            let (max_concurrent, batch_size) = match quality {
                NetworkQuality::Slow => (config.slow_max_concurrent, config.slow_batch_size),
                _ => (config.max_concurrent, config.batch_size),
            };
            state.quality = quality;
            state.max_concurrent = max_concurrent;
            state.batch_size = batch_size;
            info!(
                quality = %quality,
                max_concurrent,
                batch_size,
                queued = state.queue.len(),
                "Network quality changed"
            );
        }
        self.pump();
    }

    pub fn network_quality(&self) -> NetworkQuality {
        self.state().quality
    }

    /// Follow a network quality channel until it closes or the loader shuts
    /// down. Replaces any previously attached channel.
    pub fn attach_network(&self, mut receiver: watch::Receiver<NetworkQuality>) {
        let current = *receiver.borrow_and_update();
        self.set_network_quality(current);

        let Ok(handle) = Handle::try_current() else {
            warn!("No Tokio runtime, network changes will not be followed");
            return;
        };
        let loader: Weak<LoaderInner> = Arc::downgrade(&self.inner);
        let watcher = handle.spawn(async move {
            while receiver.changed().await.is_ok() {
                let quality = *receiver.borrow_and_update();
                let Some(inner) = loader.upgrade() else {
                    break;
                };
                FastLoader { inner }.set_network_quality(quality);
            }
        });

        let previous = self
            .inner
            .network_watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(watcher);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Queued ids, next to dispatch first.
    pub fn pending(&self) -> Vec<RequestId> {
        self.state().queue.ids()
    }

    pub fn stats(&self) -> LoaderStatsSnapshot {
        let runtime = {
            let state = self.state();
            RuntimeState {
                queue_length: state.queue.len(),
                in_flight: state.in_flight.len(),
                max_concurrent: state.max_concurrent,
                batch_size: state.batch_size,
                network_quality: state.quality,
            }
        };
        self.inner.stats.snapshot(runtime)
    }

    /// Dispatch queue heads while there is capacity.
    fn pump(&self) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        loop {
            let job = {
                let mut state = self.state();
                if !state.can_dispatch() {
                    break;
                }
                let Some(mut job) = state.queue.pop_front() else {
                    break;
                };
                let subscribers = std::mem::take(&mut job.subscribers);
                state.in_flight.insert(job.id.clone(), subscribers);
                job
            };
            debug!(
                id = %job.id,
                priority = ?job.priority,
                retry_count = job.retry_count,
                queued_ms = now_millis().saturating_sub(job.created_at),
                "Dispatching request"
            );
            let loader = self.clone();
            handle.spawn(async move { loader.execute(job).await });
        }
    }

    async fn execute(self, job: QueuedRequest) {
        let started = Instant::now();
        let attempt = tokio::time::timeout(
            job.timeout,
            dispatch(self.inner.fetcher.as_ref(), &job.params),
        )
        .await;

        match attempt {
            Ok(Ok(data)) => self.complete(job, data, started.elapsed()),
            Ok(Err(e)) => {
                LoaderStats::bump(&self.inner.stats.errors);
                self.fail(job, e);
            }
            Err(_) => {
                LoaderStats::bump(&self.inner.stats.timeouts);
                let e = FetchError::Timeout {
                    request_id: job.id.to_string(),
                    timeout_ms: job.timeout.as_millis() as u64,
                };
                self.fail(job, e.into());
            }
        }
        self.pump();
    }

    fn complete(&self, job: QueuedRequest, data: serde_json::Value, elapsed: Duration) {
        let subscribers = {
            let mut state = self.state();
            state.memo.insert(job.id.clone(), data.clone(), job.ttl);
            state.in_flight.remove(&job.id).unwrap_or_default()
        };
        LoaderStats::bump(&self.inner.stats.completed);
        self.inner.stats.record_load_time(elapsed);
        debug!(
            id = %job.id,
            elapsed_ms = elapsed.as_millis() as u64,
            subscribers = subscribers.len(),
            "Request completed"
        );

        for subscriber in subscribers {
            if let Some(on_success) = subscriber.on_success {
                on_success(Loaded {
                    id: job.id.clone(),
                    data: data.clone(),
                    retry_count: job.retry_count,
                    source: LoadSource::Network,
                });
            }
        }
    }

    fn fail(&self, mut job: QueuedRequest, error: VitrineError) {
        let subscribers = {
            let mut state = self.state();
            let subscribers = state.in_flight.remove(&job.id).unwrap_or_default();
            if error.is_retryable() && job.retry_count < self.inner.config.max_retries {
                job.retry_count += 1;
                job.priority = job.priority.at_least(LoadPriority::High);
                job.subscribers = subscribers;
                LoaderStats::bump(&self.inner.stats.retries);
                debug!(
                    id = %job.id,
                    retry_count = job.retry_count,
                    error = %error,
                    "Request failed, retrying"
                );
                state.queue.push(job);
                state.resort();
                return;
            }
            subscribers
        };

        LoaderStats::bump(&self.inner.stats.dropped);
        let mut delivered = false;
        for subscriber in subscribers {
            if let Some(on_error) = subscriber.on_error {
                on_error(error.clone());
                delivered = true;
            }
        }
        if delivered {
            return;
        }

        let exhausted = FetchError::RetriesExhausted {
            request_id: job.id.to_string(),
            attempts: job.retry_count + 1,
            last_error: error.to_string(),
        };
        match self.inner.config.exhausted_policy {
            ExhaustedPolicy::DropSilently => debug!(error = %exhausted, "Request dropped"),
            ExhaustedPolicy::LogWarning => warn!(error = %exhausted, "Request dropped"),
        }
    }
}

impl std::fmt::Debug for FastLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastLoader")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

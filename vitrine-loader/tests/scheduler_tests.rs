//! Scheduler behavior against a scripted fetcher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};
use vitrine_core::{
    ContentType, ExhaustedPolicy, FetchError, LoadParams, LoadPriority, LoaderConfig,
    NetworkQuality, ProductParams, ReviewsQuery, VitrineError, VitrineResult,
};
use vitrine_loader::{
    FastLoader, LoadRequest, LoadSource, NetworkMonitor, RequestId, VisibilityTracker,
};
use vitrine_test_utils::generators::arb_load_params;
use vitrine_test_utils::{init_test_tracing, CallbackRecorder, MockFetcher, Outcome};

fn serial_config() -> LoaderConfig {
    LoaderConfig::default()
        .with_max_concurrent(1)
        .with_slow_limits(1, 3)
}

fn loader_with(fetcher: &Arc<MockFetcher>, config: LoaderConfig) -> FastLoader {
    FastLoader::new(Arc::clone(fetcher) as Arc<dyn vitrine_loader::ContentFetcher>, config)
}

async fn expect_success(recorder: &mut CallbackRecorder) -> vitrine_loader::Loaded {
    match recorder.next().await {
        Some(Outcome::Success(loaded)) => loaded,
        other => panic!("expected a success callback, got {:?}", other),
    }
}

async fn expect_failure(recorder: &mut CallbackRecorder) -> VitrineError {
    match recorder.next().await {
        Some(Outcome::Failure(e)) => e,
        other => panic!("expected an error callback, got {:?}", other),
    }
}

/// Let spawned fetch tasks run to completion under paused time.
async fn settle() {
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_follows_priority() {
    init_test_tracing();
    let fetcher = Arc::new(MockFetcher::new());
    let loader = loader_with(&fetcher, serial_config());
    let mut recorder = CallbackRecorder::new();

    let low = LoadParams::product("low");
    let critical = LoadParams::product("critical");
    let medium = LoadParams::product("medium");
    for (params, priority) in [
        (&low, LoadPriority::Low),
        (&critical, LoadPriority::Critical),
        (&medium, LoadPriority::Medium),
    ] {
        loader.load(recorder.attach(LoadRequest::new(params.clone()).with_priority(priority)));
    }
    assert_eq!(fetcher.call_count(), 0);

    loader.initialize().unwrap();
    for _ in 0..3 {
        expect_success(&mut recorder).await;
    }

    assert_eq!(
        fetcher.calls(),
        vec![
            RequestId::for_params(&critical),
            RequestId::for_params(&medium),
            RequestId::for_params(&low),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_viewport_mark_outranks_medium() {
    let fetcher = Arc::new(MockFetcher::new());
    let loader = loader_with(&fetcher, serial_config());
    let mut recorder = CallbackRecorder::new();

    let medium = loader.load(recorder.attach(
        LoadRequest::new(LoadParams::product("header")).with_priority(LoadPriority::Medium),
    ));
    let low = loader.load(recorder.attach(
        LoadRequest::new(LoadParams::product("hero")).with_priority(LoadPriority::Low),
    ));
    loader.mark_in_viewport(&low, true);
    assert_eq!(loader.pending(), vec![low.clone(), medium.clone()]);

    loader.initialize().unwrap();
    let first = expect_success(&mut recorder).await;
    let second = expect_success(&mut recorder).await;
    assert_eq!(first.id, low);
    assert_eq!(second.id, medium);
}

#[tokio::test(start_paused = true)]
async fn test_visibility_tracker_promotes_queued_request() {
    let fetcher = Arc::new(MockFetcher::new());
    let loader = loader_with(&fetcher, serial_config());

    let offscreen = loader.load(
        LoadRequest::new(LoadParams::product("offscreen")).with_priority(LoadPriority::Medium),
    );
    let card = loader
        .load(LoadRequest::new(LoadParams::product("card")).with_priority(LoadPriority::Lazy));
    let mut tracker = VisibilityTracker::new(loader.clone());

    assert!(!tracker.observe(&card, 0.0));
    assert_eq!(loader.pending(), vec![offscreen.clone(), card.clone()]);

    assert!(tracker.observe(&card, 0.4));
    assert!(loader.is_in_viewport(&card));
    assert_eq!(loader.pending(), vec![card.clone(), offscreen]);

    tracker.forget(&card);
    assert!(!loader.is_in_viewport(&card));
    assert_eq!(tracker.visible_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failures_retry_until_success() {
    let fetcher = Arc::new(MockFetcher::new());
    let params = LoadParams::product("flaky");
    fetcher.fail_times(&params, 2);
    let loader = loader_with(&fetcher, LoaderConfig::default().with_max_retries(3));
    loader.initialize().unwrap();
    let mut recorder = CallbackRecorder::new();

    loader.load(recorder.attach(LoadRequest::new(params.clone())));
    let loaded = expect_success(&mut recorder).await;

    assert_eq!(loaded.retry_count, 2);
    assert_eq!(loaded.source, LoadSource::Network);
    assert_eq!(fetcher.calls_for(&params), 3);
    settle().await;
    assert!(recorder.try_next().is_none());

    let stats = loader.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_reach_error_callback() {
    let fetcher = Arc::new(MockFetcher::new());
    let params = LoadParams::product("gone");
    fetcher.always_fail(&params);
    let loader = loader_with(&fetcher, LoaderConfig::default().with_max_retries(2));
    loader.initialize().unwrap();
    let mut recorder = CallbackRecorder::new();

    loader.load(recorder.attach(LoadRequest::new(params.clone())));
    let error = expect_failure(&mut recorder).await;

    assert!(matches!(error, VitrineError::Fetch(FetchError::Failed { .. })));
    assert_eq!(fetcher.calls_for(&params), 3);
    assert_eq!(loader.stats().dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_without_error_callback_is_dropped() {
    let fetcher = Arc::new(MockFetcher::new());
    let params = LoadParams::product("gone");
    fetcher.always_fail(&params);
    let loader = loader_with(
        &fetcher,
        LoaderConfig::default()
            .with_max_retries(1)
            .with_exhausted_policy(ExhaustedPolicy::LogWarning),
    );
    loader.initialize().unwrap();
    let mut recorder = CallbackRecorder::new();

    loader.load(recorder.attach_success(LoadRequest::new(params.clone())));
    settle().await;

    assert!(recorder.try_next().is_none());
    assert_eq!(fetcher.calls_for(&params), 2);
    let stats = loader.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.queue_length, 0);
}

/// Serves products and nothing else.
struct ProductsOnly;

#[async_trait]
impl vitrine_loader::ContentFetcher for ProductsOnly {
    async fn fetch_product(&self, params: &ProductParams) -> VitrineResult<Value> {
        Ok(json!({ "id": params.product_id }))
    }
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_content_is_not_retried() {
    let loader = FastLoader::new(
        Arc::new(ProductsOnly),
        LoaderConfig::default().with_max_retries(3),
    );
    loader.initialize().unwrap();
    let mut recorder = CallbackRecorder::new();

    loader.load(recorder.attach(
        LoadRequest::new(LoadParams::Reviews(ReviewsQuery {
            product_id: "p1".to_string(),
            limit: 10,
        }))
        .with_priority(LoadPriority::Low),
    ));
    let error = expect_failure(&mut recorder).await;

    assert!(matches!(
        error,
        VitrineError::Fetch(FetchError::Unsupported {
            content_type: ContentType::Reviews
        })
    ));
    let stats = loader.stats();
    assert_eq!(stats.retries, 0);
    assert_eq!(stats.dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_count_as_failures() {
    let fetcher = Arc::new(MockFetcher::new());
    let params = LoadParams::product("slow");
    fetcher.delay(&params, Duration::from_secs(30));
    let loader = loader_with(&fetcher, LoaderConfig::default().with_max_retries(1));
    loader.initialize().unwrap();
    let mut recorder = CallbackRecorder::new();

    loader.load(recorder.attach(
        LoadRequest::new(params.clone()).with_timeout(Duration::from_millis(100)),
    ));
    let error = expect_failure(&mut recorder).await;

    assert!(error.is_timeout());
    let stats = loader.stats();
    assert_eq!(stats.timeouts, 2);
    assert_eq!(stats.retries, 1);
    assert_eq!(fetcher.calls_for(&params), 2);
}

#[tokio::test(start_paused = true)]
async fn test_identical_loads_share_one_fetch() {
    let fetcher = Arc::new(MockFetcher::new().with_delay(Duration::from_millis(50)));
    let loader = loader_with(&fetcher, LoaderConfig::default());
    loader.initialize().unwrap();
    let mut recorder = CallbackRecorder::new();

    let a = loader.load_product("p1", LoadPriority::Critical, recorder.success_callback());
    let b = loader.load_product("p1", LoadPriority::Critical, recorder.success_callback());
    assert_eq!(a, b);

    let one = expect_success(&mut recorder).await;
    let two = expect_success(&mut recorder).await;
    assert_eq!(one.data, two.data);
    assert_eq!(one.id, a);
    assert_eq!(fetcher.calls_for(&LoadParams::product("p1")), 1);
    assert_eq!(loader.stats().coalesced, 1);

    // Inside the memo window the result is delivered before `load` returns.
    loader.load_product("p1", LoadPriority::Low, recorder.success_callback());
    let memo = recorder.try_next().and_then(Outcome::loaded).unwrap();
    assert_eq!(memo.source, LoadSource::Memo);
    assert_eq!(memo.data, one.data);
    assert_eq!(fetcher.calls_for(&LoadParams::product("p1")), 1);
    assert_eq!(loader.stats().memo_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_queued_duplicate_takes_the_more_urgent_priority() {
    let fetcher = Arc::new(MockFetcher::new());
    let loader = loader_with(&fetcher, serial_config());

    let other = loader
        .load(LoadRequest::new(LoadParams::product("other")).with_priority(LoadPriority::High));
    let lazy = loader
        .load(LoadRequest::new(LoadParams::product("dup")).with_priority(LoadPriority::Lazy));
    assert_eq!(loader.pending(), vec![other.clone(), lazy.clone()]);

    loader.load(LoadRequest::new(LoadParams::product("dup")).with_priority(LoadPriority::Critical));
    assert_eq!(loader.pending(), vec![lazy, other]);
}

#[tokio::test(start_paused = true)]
async fn test_force_refresh_skips_memo() {
    let fetcher = Arc::new(MockFetcher::new());
    let params = LoadParams::product("p1");
    let loader = loader_with(&fetcher, LoaderConfig::default());
    loader.initialize().unwrap();
    let mut recorder = CallbackRecorder::new();

    loader.load(recorder.attach(LoadRequest::new(params.clone())));
    expect_success(&mut recorder).await;

    fetcher.respond_with(&params, json!({"price": 12}));
    loader.load(recorder.attach(LoadRequest::new(params.clone()).force_refresh()));
    let refreshed = expect_success(&mut recorder).await;

    assert_eq!(refreshed.source, LoadSource::Network);
    assert_eq!(refreshed.data, json!({"price": 12}));
    assert_eq!(fetcher.calls_for(&params), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_ttl_disables_memo() {
    let fetcher = Arc::new(MockFetcher::new());
    let params = LoadParams::product("p1");
    let loader = loader_with(&fetcher, LoaderConfig::default());
    loader.initialize().unwrap();
    let mut recorder = CallbackRecorder::new();

    for _ in 0..2 {
        loader.load(recorder.attach(LoadRequest::new(params.clone()).with_ttl(Duration::ZERO)));
        expect_success(&mut recorder).await;
    }
    assert_eq!(fetcher.calls_for(&params), 2);
}

#[tokio::test(start_paused = true)]
async fn test_memo_expires_after_content_ttl() {
    let fetcher = Arc::new(MockFetcher::new());
    let params = LoadParams::profile("u1");
    let loader = loader_with(&fetcher, LoaderConfig::default());
    loader.initialize().unwrap();
    let mut recorder = CallbackRecorder::new();

    loader.load(recorder.attach(LoadRequest::new(params.clone())));
    expect_success(&mut recorder).await;

    tokio::time::advance(params.content_type().default_memo_ttl()).await;
    loader.load(recorder.attach(LoadRequest::new(params.clone())));
    let again = expect_success(&mut recorder).await;
    assert_eq!(again.source, LoadSource::Network);
    assert_eq!(fetcher.calls_for(&params), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_request_never_fetches() {
    let fetcher = Arc::new(MockFetcher::new());
    let loader = loader_with(&fetcher, LoaderConfig::default());
    let mut recorder = CallbackRecorder::new();

    let id = loader.load(recorder.attach(LoadRequest::new(LoadParams::product("p1"))));
    assert!(loader.cancel_request(&id));
    loader.initialize().unwrap();
    settle().await;

    assert_eq!(fetcher.call_count(), 0);
    assert!(recorder.try_next().is_none());
    assert!(!loader.cancel_request(&id));
}

#[tokio::test(start_paused = true)]
async fn test_slow_network_caps_in_flight() {
    let fetcher = Arc::new(MockFetcher::new().with_delay(Duration::from_secs(1)));
    let loader = loader_with(&fetcher, LoaderConfig::default());
    loader.initialize().unwrap();
    loader.set_network_quality(NetworkQuality::Slow);

    for i in 0..5 {
        loader.load(LoadRequest::new(LoadParams::product(format!("p{}", i))));
    }
    let stats = loader.stats();
    assert_eq!(stats.in_flight, 2);
    assert_eq!(stats.queue_length, 3);

    loader.set_network_quality(NetworkQuality::Fast);
    let stats = loader.stats();
    assert_eq!(stats.in_flight, 5);
    assert_eq!(stats.queue_length, 0);
}

#[tokio::test(start_paused = true)]
async fn test_offline_holds_queue_until_reconnect() {
    let fetcher = Arc::new(MockFetcher::new());
    let loader = loader_with(&fetcher, LoaderConfig::default());
    let monitor = NetworkMonitor::default();
    monitor.report(None, false);
    loader.attach_network(monitor.subscribe());
    loader.initialize().unwrap();
    assert_eq!(loader.network_quality(), NetworkQuality::Offline);

    let mut recorder = CallbackRecorder::new();
    loader.load(recorder.attach(LoadRequest::new(LoadParams::product("p1"))));
    settle().await;
    assert_eq!(fetcher.call_count(), 0);
    assert_eq!(loader.pending().len(), 1);

    monitor.report(Some(0.8), true);
    let loaded = expect_success(&mut recorder).await;
    assert_eq!(loaded.source, LoadSource::Network);
    assert_eq!(loader.network_quality(), NetworkQuality::Slow);
    assert_eq!(loader.stats().max_concurrent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_prefetch_batch_staggers_chunks() {
    let fetcher = Arc::new(MockFetcher::new());
    let loader = loader_with(
        &fetcher,
        LoaderConfig::default()
            .with_batch_size(3)
            .with_slow_limits(2, 2)
            .with_prefetch_stagger(Duration::from_millis(200)),
    );
    loader.initialize().unwrap();

    let params: Vec<LoadParams> = (0..7)
        .map(|i| LoadParams::product(format!("p{}", i)))
        .collect();
    let started = tokio::time::Instant::now();
    let ids = loader.prefetch_batch(params.clone()).await;

    // Three chunks, two pauses.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(400));
    assert!(elapsed < Duration::from_millis(600));
    assert_eq!(ids.len(), 7);
    for (id, params) in ids.iter().zip(&params) {
        assert_eq!(*id, RequestId::for_params(params));
    }
    settle().await;
    assert_eq!(fetcher.call_count(), 7);

    let mut recorder = CallbackRecorder::new();
    loader.load(recorder.attach(LoadRequest::new(params[0].clone())));
    let warmed = recorder.try_next().and_then(Outcome::loaded).unwrap();
    assert_eq!(warmed.source, LoadSource::Memo);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_holds_queue_and_drops_memo() {
    let fetcher = Arc::new(MockFetcher::new());
    let params = LoadParams::product("p1");
    let loader = loader_with(&fetcher, LoaderConfig::default());
    loader.initialize().unwrap();
    let mut recorder = CallbackRecorder::new();

    loader.load(recorder.attach(LoadRequest::new(params.clone())));
    expect_success(&mut recorder).await;

    loader.shutdown();
    loader.load(recorder.attach(LoadRequest::new(params.clone())));
    settle().await;
    assert!(recorder.try_next().is_none());
    assert_eq!(loader.pending().len(), 1);

    loader.initialize().unwrap();
    let loaded = expect_success(&mut recorder).await;
    assert_eq!(loaded.source, LoadSource::Network);
    assert_eq!(fetcher.calls_for(&params), 2);
}

#[test]
fn test_invalid_config_is_rejected() {
    let loader = FastLoader::new(
        Arc::new(MockFetcher::new()),
        LoaderConfig::default().with_max_concurrent(0),
    );
    assert!(matches!(loader.initialize(), Err(VitrineError::Config(_))));
}

proptest! {
    #[test]
    fn prop_request_id_depends_only_on_params(params in arb_load_params()) {
        let id = RequestId::for_params(&params);
        prop_assert_eq!(&id, &RequestId::for_params(&params.clone()));
        let prefix = format!("{}:", params.content_type());
        prop_assert!(id.as_str().starts_with(&prefix));
    }

    #[test]
    fn prop_distinct_products_get_distinct_ids(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
        prop_assume!(a != b);
        prop_assert_ne!(
            RequestId::for_params(&LoadParams::product(a)),
            RequestId::for_params(&LoadParams::product(b))
        );
    }
}

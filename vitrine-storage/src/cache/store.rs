//! Tiered read-through cache store.
//!
//! Reads walk memory → persistent → fallback and return the first fresh hit,
//! promoting it into memory. A full miss calls the caller's fetcher and
//! writes the result back. Storage failures are logged and counted, then
//! treated as misses; only fetcher errors and invalid keys reach the caller.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use vitrine_core::{
    now_millis, CacheConfig, CacheEntry, CacheRegion, EpochMillis, Staleness, StorageError,
    TierKind, VitrineResult,
};

use super::cleanup::CleanupHandle;
use super::file_backend::FileCacheBackend;
use super::freshness::CacheRead;
use super::lmdb_backend::LmdbCacheBackend;
use super::memory::MemoryTier;
use super::options::{GetOptions, SetOptions};
use super::preload::{order_by_priority, PreloadItem, PreloadReport};
use super::region_key::RegionScopedKey;
use super::traits::{CacheCounters, CacheStats, CacheTier, CleanupMetadata};
use super::write_guard::{WriteGuard, WritePermit};

/// Multi-tier cache store.
///
/// Cheap to clone; clones share tiers, counters and the cleanup task.
///
/// # Example
///
/// ```ignore
/// let store = CacheStore::new(CacheConfig::default().with_persistent_path("/var/cache/app"));
/// store.initialize().await?;
///
/// let product: Product = store
///     .get(&CacheRegion::PRODUCTS, "p-42", || api.product("p-42"), GetOptions::new())
///     .await?;
/// ```
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

pub(super) struct StoreInner {
    config: CacheConfig,
    memory: Arc<MemoryTier>,
    persistent: RwLock<Option<Arc<dyn CacheTier>>>,
    fallback: RwLock<Option<Arc<dyn CacheTier>>>,
    tiers_injected: bool,
    initialized: AtomicBool,
    write_guard: WriteGuard,
    /// Keys with a background refresh running.
    refreshing: Mutex<HashSet<RegionScopedKey>>,
    counters: CacheCounters,
    /// Cleanup bookkeeping when no tier can persist it.
    local_metadata: Mutex<Option<CleanupMetadata>>,
    cleanup: Mutex<Option<CleanupHandle>>,
}

/// Non-owning handle used by the cleanup task.
#[derive(Clone)]
pub(super) struct WeakCacheStore(Weak<StoreInner>);

impl WeakCacheStore {
    pub(super) fn upgrade(&self) -> Option<CacheStore> {
        self.0.upgrade().map(|inner| CacheStore { inner })
    }
}

impl CacheStore {
    /// Build a store from `config`.
    ///
    /// The memory tier is usable immediately; the persistent and fallback
    /// tiers are opened by [`CacheStore::initialize`].
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None, None, false)
    }

    /// Build a store with caller-provided lower tiers.
    ///
    /// `initialize` will not open tiers from the config paths.
    pub fn with_tiers(
        config: CacheConfig,
        persistent: Option<Arc<dyn CacheTier>>,
        fallback: Option<Arc<dyn CacheTier>>,
    ) -> Self {
        Self::build(config, persistent, fallback, true)
    }

    fn build(
        config: CacheConfig,
        persistent: Option<Arc<dyn CacheTier>>,
        fallback: Option<Arc<dyn CacheTier>>,
        tiers_injected: bool,
    ) -> Self {
        let memory = Arc::new(MemoryTier::new(config.memory_capacity));
        Self {
            inner: Arc::new(StoreInner {
                config,
                memory,
                persistent: RwLock::new(persistent),
                fallback: RwLock::new(fallback),
                tiers_injected,
                initialized: AtomicBool::new(false),
                write_guard: WriteGuard::new(),
                refreshing: Mutex::new(HashSet::new()),
                counters: CacheCounters::default(),
                local_metadata: Mutex::new(None),
                cleanup: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Open configured tiers and start the cleanup task. Idempotent.
    ///
    /// A persistent tier that cannot be opened is logged and skipped; the
    /// fallback tier then takes its place.
    pub async fn initialize(&self) -> VitrineResult<()> {
        self.inner.config.validate()?;
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if !self.inner.tiers_injected {
            self.open_configured_tiers();
        }

        if self.inner.config.cleanup_enabled {
            let handle = CleanupHandle::spawn(
                WeakCacheStore(Arc::downgrade(&self.inner)),
                self.inner.config.cleanup_interval,
            );
            if let Ok(mut slot) = self.inner.cleanup.lock() {
                *slot = Some(handle);
            }
        }

        info!(
            persistent = self.persistent().is_some(),
            fallback = self.fallback().is_some(),
            memory_capacity = self.inner.config.memory_capacity,
            cleanup = self.inner.config.cleanup_enabled,
            "Cache store initialized"
        );
        Ok(())
    }

    /// Stop the cleanup task. The tiers stay usable.
    pub async fn shutdown(&self) {
        let handle = self.inner.cleanup.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.stop().await;
        }
        self.inner.initialized.store(false, Ordering::SeqCst);
        info!("Cache store shut down");
    }

    fn open_configured_tiers(&self) {
        let config = &self.inner.config;
        if let Some(path) = &config.persistent_path {
            match LmdbCacheBackend::new(path, config.persistent_map_size_mb) {
                Ok(backend) => {
                    if let Ok(mut slot) = self.inner.persistent.write() {
                        *slot = Some(Arc::new(backend));
                    }
                }
                Err(e) => {
                    CacheCounters::bump(&self.inner.counters.storage_errors);
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Persistent tier unavailable, falling back"
                    );
                }
            }
        }
        if let Some(path) = &config.fallback_path {
            match FileCacheBackend::open(path) {
                Ok(backend) => {
                    if let Ok(mut slot) = self.inner.fallback.write() {
                        *slot = Some(Arc::new(backend));
                    }
                }
                Err(e) => {
                    CacheCounters::bump(&self.inner.counters.storage_errors);
                    warn!(path = %path.display(), error = %e, "Fallback tier unavailable");
                }
            }
        }
    }

    pub(super) fn inner_memory(&self) -> &MemoryTier {
        &self.inner.memory
    }

    pub(super) fn counters(&self) -> &CacheCounters {
        &self.inner.counters
    }

    pub(super) fn local_metadata(&self) -> Option<CleanupMetadata> {
        self.inner.local_metadata.lock().ok().and_then(|meta| *meta)
    }

    pub(super) fn set_local_metadata(&self, metadata: CleanupMetadata) {
        if let Ok(mut slot) = self.inner.local_metadata.lock() {
            *slot = Some(metadata);
        }
    }

    pub(super) fn persistent(&self) -> Option<Arc<dyn CacheTier>> {
        self.inner.persistent.read().ok().and_then(|slot| slot.clone())
    }

    pub(super) fn fallback(&self) -> Option<Arc<dyn CacheTier>> {
        self.inner.fallback.read().ok().and_then(|slot| slot.clone())
    }

    /// Tiers in lookup order.
    fn tiers(&self) -> Vec<Arc<dyn CacheTier>> {
        let mut tiers = vec![Arc::clone(&self.inner.memory) as Arc<dyn CacheTier>];
        tiers.extend(self.persistent());
        tiers.extend(self.fallback());
        tiers
    }

    /// Log and count a tier failure, turning it into `None`.
    pub(super) fn absorb<T>(
        &self,
        tier: TierKind,
        op: &'static str,
        result: VitrineResult<T>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                CacheCounters::bump(&self.inner.counters.storage_errors);
                warn!(tier = %tier, op, error = %e, "Cache tier operation failed");
                None
            }
        }
    }

    async fn lock_key(&self, key: &RegionScopedKey) -> Option<WritePermit> {
        match self.inner.write_guard.acquire(key).await {
            Ok(permit) => Some(permit),
            Err(e) => {
                CacheCounters::bump(&self.inner.counters.storage_errors);
                warn!(key = %key, error = %e, "Write guard unavailable, writing unguarded");
                None
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, tier: TierKind, data: serde_json::Value) -> Option<T> {
        let result: VitrineResult<T> = serde_json::from_value(data).map_err(|e| {
            StorageError::Serialization {
                reason: e.to_string(),
            }
            .into()
        });
        self.absorb(tier, "decode", result)
    }

    /// Read `(region, key)`, calling `fetcher` on a miss.
    pub async fn get<T, F, Fut>(
        &self,
        region: &CacheRegion,
        key: &str,
        fetcher: F,
        options: GetOptions,
    ) -> VitrineResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = VitrineResult<T>> + Send + 'static,
    {
        self.get_read(region, key, fetcher, options)
            .await
            .map(CacheRead::into_value)
    }

    /// Like [`CacheStore::get`], also reporting where the value came from.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error unchanged, or a validation error for an
    /// empty key. Tier failures are never returned.
    pub async fn get_read<T, F, Fut>(
        &self,
        region: &CacheRegion,
        key: &str,
        fetcher: F,
        options: GetOptions,
    ) -> VitrineResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = VitrineResult<T>> + Send + 'static,
    {
        let scoped = RegionScopedKey::new(region.clone(), key)?;
        let write_options = options.write_options();

        if region.is_profile() {
            debug!(key = %scoped, "Profile region bypasses cache tiers");
        } else if options.force_refresh {
            debug!(key = %scoped, "Forced refresh");
        } else {
            let version = options.version.unwrap_or(self.inner.config.default_version);
            let now = now_millis();
            let mut stale: Option<(T, TierKind, EpochMillis)> = None;

            for tier in self.tiers() {
                let kind = tier.kind();
                let Some(entry) = self.absorb(kind, "read", tier.read(&scoped).await).flatten()
                else {
                    continue;
                };
                match entry.classify(now, version) {
                    Staleness::Fresh => {
                        let Some(value) = self.decode::<T>(kind, entry.data.clone()) else {
                            continue;
                        };
                        if kind != TierKind::Memory {
                            let promoted = self.inner.memory.write(&scoped, &entry).await;
                            self.absorb(TierKind::Memory, "promote", promoted);
                        }
                        self.inner.counters.record_hit(kind);
                        debug!(key = %scoped, tier = %kind, "Cache hit");
                        return Ok(CacheRead::from_tier(value, kind, entry.timestamp));
                    }
                    Staleness::Stale if options.background && stale.is_none() => {
                        let timestamp = entry.timestamp;
                        if let Some(value) = self.decode::<T>(kind, entry.data) {
                            stale = Some((value, kind, timestamp));
                        }
                    }
                    Staleness::Stale | Staleness::WrongVersion => {}
                }
            }

            if let Some((value, kind, timestamp)) = stale {
                CacheCounters::bump(&self.inner.counters.stale_served);
                debug!(key = %scoped, tier = %kind, "Serving stale value, refreshing ahead");
                self.spawn_refresh(scoped, fetcher, write_options);
                return Ok(CacheRead::stale_from_tier(value, kind, timestamp));
            }
        }

        CacheCounters::bump(&self.inner.counters.misses);
        debug!(key = %scoped, "Cache miss");
        let value = self.fetch(&scoped, fetcher).await?;
        self.write_through(&scoped, &value, write_options).await;
        Ok(CacheRead::from_origin(value))
    }

    async fn fetch<T, F, Fut>(&self, key: &RegionScopedKey, fetcher: F) -> VitrineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = VitrineResult<T>>,
    {
        match fetcher().await {
            Ok(value) => Ok(value),
            Err(e) => {
                CacheCounters::bump(&self.inner.counters.errors);
                debug!(key = %key, error = %e, "Fetcher failed, nothing written");
                Err(e)
            }
        }
    }

    fn spawn_refresh<T, F, Fut>(&self, key: RegionScopedKey, fetcher: F, options: SetOptions)
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = VitrineResult<T>> + Send + 'static,
    {
        let started = self
            .inner
            .refreshing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        if !started {
            debug!(key = %key, "Background refresh already running");
            return;
        }

        CacheCounters::bump(&self.inner.counters.background_refreshes);
        let store = self.clone();
        tokio::spawn(async move {
            match store.fetch(&key, fetcher).await {
                Ok(value) => {
                    store.write_through(&key, &value, options).await;
                    debug!(key = %key, "Background refresh complete");
                }
                Err(e) => warn!(key = %key, error = %e, "Background refresh failed"),
            }
            store
                .inner
                .refreshing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        });
    }

    /// Write `value` to the tiers under the key's write guard.
    ///
    /// Profile-region values go to memory only, with their TTL clamped. The
    /// fallback tier is written when there is no persistent tier or the
    /// persistent write failed.
    async fn write_through<T: Serialize + ?Sized>(
        &self,
        key: &RegionScopedKey,
        value: &T,
        options: SetOptions,
    ) {
        let config = &self.inner.config;
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(e) => {
                let err = StorageError::Serialization {
                    reason: e.to_string(),
                };
                self.absorb::<()>(TierKind::Memory, "encode", Err(err.into()));
                return;
            }
        };
        let profile = key.region().is_profile();
        let mut ttl = options.ttl.unwrap_or(config.default_ttl);
        if profile {
            ttl = ttl.min(config.profile_ttl);
        }
        let entry = CacheEntry::new(
            data,
            options.version.unwrap_or(config.default_version),
            ttl.as_millis() as u64,
        );

        let _permit = self.lock_key(key).await;

        let written = self.inner.memory.write(key, &entry).await;
        self.absorb(TierKind::Memory, "write", written);
        if profile {
            return;
        }

        let persisted = match self.persistent() {
            Some(tier) => {
                let written = tier.write(key, &entry).await;
                self.absorb(TierKind::Persistent, "write", written).is_some()
            }
            None => false,
        };
        if !persisted {
            if let Some(tier) = self.fallback() {
                let written = tier.write(key, &entry).await;
                self.absorb(TierKind::Fallback, "write", written);
            }
        }
    }

    /// Store `value` directly.
    ///
    /// Concurrent sets for the same key are applied one after the other.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        region: &CacheRegion,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> VitrineResult<()> {
        let scoped = RegionScopedKey::new(region.clone(), key)?;
        self.write_through(&scoped, value, options).await;
        CacheCounters::bump(&self.inner.counters.sets);
        debug!(key = %scoped, "Cache set");
        Ok(())
    }

    /// Delete `(region, key)` from every tier. Returns whether any tier had it.
    pub async fn remove(&self, region: &CacheRegion, key: &str) -> VitrineResult<bool> {
        let scoped = RegionScopedKey::new(region.clone(), key)?;
        let _permit = self.lock_key(&scoped).await;
        let mut existed = false;
        for tier in self.tiers() {
            let deleted = tier.delete(&scoped).await;
            if let Some(true) = self.absorb(tier.kind(), "delete", deleted) {
                existed = true;
            }
        }
        if existed {
            CacheCounters::bump(&self.inner.counters.removals);
        }
        Ok(existed)
    }

    /// Delete every entry of `region` from every tier.
    pub async fn clear_region(&self, region: &CacheRegion) -> u64 {
        let mut removed = 0;
        for tier in self.tiers() {
            let deleted = tier.delete_region(region).await;
            removed += self.absorb(tier.kind(), "clear_region", deleted).unwrap_or(0);
        }
        CacheCounters::add(&self.inner.counters.removals, removed);
        info!(region = %region, removed, "Cache region cleared");
        removed
    }

    /// Delete every cache-owned entry from every tier.
    ///
    /// Cleanup bookkeeping and foreign keys in the fallback document are kept.
    pub async fn clear_all(&self) -> u64 {
        let mut removed = 0;
        for tier in self.tiers() {
            let cleared = tier.clear().await;
            removed += self.absorb(tier.kind(), "clear", cleared).unwrap_or(0);
        }
        CacheCounters::add(&self.inner.counters.removals, removed);
        info!(removed, "Cache cleared");
        removed
    }

    /// True iff some tier holds an unexpired entry for the key, whatever its
    /// version.
    pub async fn exists(&self, region: &CacheRegion, key: &str) -> VitrineResult<bool> {
        let scoped = RegionScopedKey::new(region.clone(), key)?;
        let now = now_millis();
        for tier in self.tiers() {
            let read = tier.read(&scoped).await;
            if let Some(Some(entry)) = self.absorb(tier.kind(), "read", read) {
                if !entry.is_expired(now) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Warm the cache for `items`.
    ///
    /// Items run most urgent first, `preload_batch_size` at a time, with
    /// `preload_stagger` between batches. Failures are counted, not returned.
    pub async fn preload<T>(&self, mut items: Vec<PreloadItem<T>>) -> PreloadReport
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        order_by_priority(&mut items);
        let batch_size = self.inner.config.preload_batch_size.max(1);
        let stagger = self.inner.config.preload_stagger;
        let mut report = PreloadReport::default();

        let mut pending = items.into_iter().peekable();
        while pending.peek().is_some() {
            let batch: Vec<PreloadItem<T>> = pending.by_ref().take(batch_size).collect();
            let results = join_all(batch.into_iter().map(|item| async move {
                let PreloadItem {
                    region,
                    key,
                    fetcher,
                    options,
                } = item;
                let result = self.get::<T, _, _>(&region, &key, fetcher, options).await;
                (region, key, result)
            }))
            .await;

            for (region, key, result) in results {
                match result {
                    Ok(_) => report.loaded += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(region = %region, key = %key, error = %e, "Preload item failed");
                    }
                }
            }

            if pending.peek().is_some() && !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
        }

        info!(
            loaded = report.loaded,
            failed = report.failed,
            "Cache preload complete"
        );
        report
    }

    /// Snapshot of the store's counters.
    pub fn statistics(&self) -> CacheStats {
        self.inner
            .counters
            .snapshot(self.inner.memory.entry_count())
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.inner.config)
            .field("persistent", &self.persistent().is_some())
            .field("fallback", &self.fallback().is_some())
            .finish_non_exhaustive()
    }
}

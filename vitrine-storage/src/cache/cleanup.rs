//! Expiry sweeps and the background cleanup task.
//!
//! A sweep removes entries that outlived their own TTL from every tier. The
//! persistent tier is walked oldest first through its timestamp index and
//! each key it drops is also evicted from memory.
//!
//! Sweeps are gated by the persisted `lastCleanup` timestamp: unless forced,
//! a sweep within `cleanup_min_gap` of the previous one is skipped, so
//! restarting the process does not re-sweep every time.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use vitrine_core::{now_millis, EpochMillis, TierKind, VitrineResult};

use super::store::{CacheStore, WeakCacheStore};
use super::traits::{CacheCounters, CacheTier, CleanupMetadata};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// The sweep was skipped because the previous one is too recent.
    pub skipped: bool,
    pub memory_removed: u64,
    pub persistent_removed: u64,
    pub fallback_removed: u64,
    /// Cumulative count across all sweeps, as persisted.
    pub deleted_total: u64,
    pub ran_at: EpochMillis,
}

impl CleanupReport {
    /// Entries removed by this sweep.
    pub fn removed(&self) -> u64 {
        self.memory_removed + self.persistent_removed + self.fallback_removed
    }
}

impl CacheStore {
    /// Run one expiry sweep over every tier.
    ///
    /// Without `force` the sweep is skipped when the last recorded sweep is
    /// younger than the configured minimum gap. Tier failures are logged and
    /// the sweep continues with the remaining tiers.
    pub async fn run_cleanup(&self, force: bool) -> CleanupReport {
        let now = now_millis();
        let previous = self.load_cleanup_metadata().await;
        let min_gap = self.config().cleanup_min_gap.as_millis() as i64;

        if let Some(meta) = previous {
            if !force && now.saturating_sub(meta.last_cleanup) < min_gap {
                debug!(
                    last_cleanup = meta.last_cleanup,
                    "Cleanup skipped, previous sweep is recent"
                );
                return CleanupReport {
                    skipped: true,
                    deleted_total: meta.deleted_count,
                    ran_at: now,
                    ..Default::default()
                };
            }
        }

        let mut report = CleanupReport {
            ran_at: now,
            ..Default::default()
        };

        if let Some(tier) = self.persistent() {
            let swept = tier.sweep_expired(now).await;
            if let Some(keys) = self.cleanup_step(TierKind::Persistent, swept) {
                report.persistent_removed = keys.len() as u64;
                let evicted = self.inner_memory().evict(&keys);
                report.memory_removed += self.cleanup_step(TierKind::Memory, evicted).unwrap_or(0);
            }
        }

        let swept = self.inner_memory().sweep_expired(now).await;
        report.memory_removed += self
            .cleanup_step(TierKind::Memory, swept)
            .map(|keys| keys.len() as u64)
            .unwrap_or(0);

        if let Some(tier) = self.fallback() {
            let swept = tier.sweep_expired(now).await;
            report.fallback_removed = self
                .cleanup_step(TierKind::Fallback, swept)
                .map(|keys| keys.len() as u64)
                .unwrap_or(0);
        }

        let metadata = CleanupMetadata {
            last_cleanup: now,
            deleted_count: previous.map(|m| m.deleted_count).unwrap_or(0) + report.removed(),
        };
        report.deleted_total = metadata.deleted_count;
        self.store_cleanup_metadata(&metadata).await;
        CacheCounters::add(&self.counters().expired_evictions, report.removed());

        info!(
            memory = report.memory_removed,
            persistent = report.persistent_removed,
            fallback = report.fallback_removed,
            deleted_total = report.deleted_total,
            "Cache cleanup cycle completed"
        );
        report
    }

    fn cleanup_step<T>(&self, tier: TierKind, result: VitrineResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                CacheCounters::bump(&self.counters().storage_errors);
                error!(tier = %tier, error = %e, "Cache cleanup failed for tier");
                None
            }
        }
    }

    async fn load_cleanup_metadata(&self) -> Option<CleanupMetadata> {
        match self.persistent().or_else(|| self.fallback()) {
            Some(tier) => {
                let loaded = tier.load_metadata().await;
                self.absorb(tier.kind(), "load_metadata", loaded).flatten()
            }
            None => self.local_metadata(),
        }
    }

    async fn store_cleanup_metadata(&self, metadata: &CleanupMetadata) {
        match self.persistent().or_else(|| self.fallback()) {
            Some(tier) => {
                let stored = tier.store_metadata(metadata).await;
                self.absorb(tier.kind(), "store_metadata", stored);
            }
            None => self.set_local_metadata(*metadata),
        }
    }
}

/// Handle to a running cleanup task.
pub(super) struct CleanupHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CleanupHandle {
    pub(super) fn spawn(store: WeakCacheStore, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(cleanup_task(store, period, shutdown_rx));
        Self {
            shutdown_tx,
            handle,
        }
    }

    pub(super) async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Cache cleanup task ended abnormally");
        }
    }
}

/// Periodic sweep loop. Ends on shutdown or once the store is dropped.
async fn cleanup_task(store: WeakCacheStore, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_secs = period.as_secs(),
        "Cache cleanup task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Cache cleanup task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else {
                    break;
                };
                let report = store.run_cleanup(false).await;
                if !report.skipped && report.removed() == 0 {
                    debug!("Cache cleanup cycle removed nothing");
                }
            }
        }
    }
}

//! Loader counters. Diagnostic only; nothing in the loader reads them back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use vitrine_core::NetworkQuality;

/// Live counters.
#[derive(Debug, Default)]
pub struct LoaderStats {
    pub requests: AtomicU64,
    pub memo_hits: AtomicU64,
    /// Loads that had to be queued for a fetch.
    pub misses: AtomicU64,
    /// Loads attached to an already queued or in-flight request.
    pub coalesced: AtomicU64,
    pub completed: AtomicU64,
    pub errors: AtomicU64,
    pub timeouts: AtomicU64,
    pub retries: AtomicU64,
    /// Requests that exhausted their retries.
    pub dropped: AtomicU64,
    pub cancelled: AtomicU64,
    pub total_load_time_ms: AtomicU64,
}

impl LoaderStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_time(&self, elapsed: Duration) {
        self.total_load_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, runtime: RuntimeState) -> LoaderStatsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let total_load_time_ms = self.total_load_time_ms.load(Ordering::Relaxed);
        LoaderStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            memo_hits: self.memo_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            completed,
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            total_load_time_ms,
            average_load_time_ms: if completed == 0 {
                0.0
            } else {
                total_load_time_ms as f64 / completed as f64
            },
            queue_length: runtime.queue_length,
            in_flight: runtime.in_flight,
            max_concurrent: runtime.max_concurrent,
            batch_size: runtime.batch_size,
            network_quality: runtime.network_quality,
        }
    }
}

/// Scheduler state folded into a snapshot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RuntimeState {
    pub(crate) queue_length: usize,
    pub(crate) in_flight: usize,
    pub(crate) max_concurrent: usize,
    pub(crate) batch_size: usize,
    pub(crate) network_quality: NetworkQuality,
}

/// Point-in-time copy of the loader's counters and scheduler state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoaderStatsSnapshot {
    pub requests: u64,
    pub memo_hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub completed: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub dropped: u64,
    pub cancelled: u64,
    pub total_load_time_ms: u64,
    /// Mean duration of successful loads.
    pub average_load_time_ms: f64,
    pub queue_length: usize,
    pub in_flight: usize,
    pub max_concurrent: usize,
    pub batch_size: usize,
    pub network_quality: NetworkQuality,
}

//! Short-lived memo of completed loads, keyed by request id.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;

use crate::request::RequestId;

#[derive(Debug, Clone)]
struct MemoEntry {
    data: serde_json::Value,
    stored_at: Instant,
    ttl: Duration,
}

/// Bounded memo window. Entries expire after their own TTL; the least
/// recently used entry is evicted at capacity.
#[derive(Debug)]
pub(crate) struct MemoCache {
    entries: LruCache<RequestId, MemoEntry>,
}

impl MemoCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// The memoized payload for `id`, if still inside its window.
    pub(crate) fn get(&mut self, id: &RequestId) -> Option<serde_json::Value> {
        let expired = match self.entries.get(id) {
            Some(entry) if entry.stored_at.elapsed() < entry.ttl => {
                return Some(entry.data.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(id);
        }
        None
    }

    /// Memoize `data`. A zero TTL stores nothing.
    pub(crate) fn insert(&mut self, id: RequestId, data: serde_json::Value, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.entries.put(
            id,
            MemoEntry {
                data,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

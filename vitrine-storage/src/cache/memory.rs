//! In-memory tier: process-lifetime, LRU-bounded.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use lru::LruCache;
use vitrine_core::{CacheRegion, EpochMillis, StorageError, TierKind, VitrineResult};

use super::region_key::RegionScopedKey;
use super::traits::{CacheTier, StoredEntry};

/// Fastest tier. Least recently used entries are evicted at capacity.
pub struct MemoryTier {
    entries: Mutex<LruCache<RegionScopedKey, StoredEntry>>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> VitrineResult<MutexGuard<'_, LruCache<RegionScopedKey, StoredEntry>>> {
        self.entries
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Number of entries without going through the async trait.
    pub fn entry_count(&self) -> u64 {
        self.entries.lock().map(|e| e.len() as u64).unwrap_or(0)
    }

    /// Drop specific keys, used when a sweep of another tier expired them.
    pub fn evict(&self, keys: &[RegionScopedKey]) -> VitrineResult<u64> {
        let mut entries = self.lock()?;
        let mut evicted = 0;
        for key in keys {
            if entries.pop(key).is_some() {
                evicted += 1;
            }
        }
        Ok(evicted)
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    async fn read(&self, key: &RegionScopedKey) -> VitrineResult<Option<StoredEntry>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn write(&self, key: &RegionScopedKey, entry: &StoredEntry) -> VitrineResult<()> {
        self.lock()?.put(key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &RegionScopedKey) -> VitrineResult<bool> {
        Ok(self.lock()?.pop(key).is_some())
    }

    async fn delete_region(&self, region: &CacheRegion) -> VitrineResult<u64> {
        let mut entries = self.lock()?;
        let doomed: Vec<RegionScopedKey> = entries
            .iter()
            .filter(|(key, _)| key.region() == region)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn clear(&self) -> VitrineResult<u64> {
        let mut entries = self.lock()?;
        let count = entries.len() as u64;
        entries.clear();
        Ok(count)
    }

    async fn sweep_expired(&self, now: EpochMillis) -> VitrineResult<Vec<RegionScopedKey>> {
        let mut entries = self.lock()?;
        let expired: Vec<RegionScopedKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        Ok(expired)
    }

    async fn len(&self) -> VitrineResult<u64> {
        Ok(self.lock()?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vitrine_core::CacheEntry;

    fn key(region: CacheRegion, k: &str) -> RegionScopedKey {
        RegionScopedKey::new(region, k).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tier = MemoryTier::new(10);
        let k = key(CacheRegion::PRODUCTS, "p1");
        tier.write(&k, &CacheEntry::new(json!({"name": "lamp"}), 1, 1_000))
            .await
            .unwrap();

        let entry = tier.read(&k).await.unwrap().unwrap();
        assert_eq!(entry.data["name"], "lamp");
        assert_eq!(tier.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let tier = MemoryTier::new(2);
        let a = key(CacheRegion::PRODUCTS, "a");
        let b = key(CacheRegion::PRODUCTS, "b");
        let c = key(CacheRegion::PRODUCTS, "c");
        tier.write(&a, &CacheEntry::new(json!(1), 1, 1_000)).await.unwrap();
        tier.write(&b, &CacheEntry::new(json!(2), 1, 1_000)).await.unwrap();
        // Touch `a` so `b` is the eviction candidate.
        tier.read(&a).await.unwrap();
        tier.write(&c, &CacheEntry::new(json!(3), 1, 1_000)).await.unwrap();

        assert!(tier.read(&a).await.unwrap().is_some());
        assert!(tier.read(&b).await.unwrap().is_none());
        assert!(tier.read(&c).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_region_only_touches_region() {
        let tier = MemoryTier::new(10);
        tier.write(&key(CacheRegion::PRODUCTS, "a"), &CacheEntry::new(json!(1), 1, 1_000))
            .await
            .unwrap();
        tier.write(&key(CacheRegion::PRODUCTS, "b"), &CacheEntry::new(json!(2), 1, 1_000))
            .await
            .unwrap();
        tier.write(&key(CacheRegion::SETTINGS, "c"), &CacheEntry::new(json!(3), 1, 1_000))
            .await
            .unwrap();

        assert_eq!(tier.delete_region(&CacheRegion::PRODUCTS).await.unwrap(), 2);
        assert_eq!(tier.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let tier = MemoryTier::new(10);
        let old = key(CacheRegion::FEEDS, "old");
        let new = key(CacheRegion::FEEDS, "new");
        tier.write(&old, &CacheEntry::at(json!(1), 0, 1, 10)).await.unwrap();
        tier.write(&new, &CacheEntry::at(json!(2), 0, 1, 10_000)).await.unwrap();

        let swept = tier.sweep_expired(100).await.unwrap();
        assert_eq!(swept, vec![old]);
        assert!(tier.read(&new).await.unwrap().is_some());
    }
}

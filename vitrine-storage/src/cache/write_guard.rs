//! Per-key write serialization.
//!
//! A write to `(region, key)` holds that key's async mutex across all of its
//! tier writes, so a second write for the same key waits for the first one
//! to finish. Writes to different keys never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use vitrine_core::{StorageError, VitrineResult};

use super::region_key::RegionScopedKey;

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Registry of per-key write locks.
#[derive(Debug, Default)]
pub struct WriteGuard {
    locks: Arc<Mutex<HashMap<RegionScopedKey, KeyLock>>>,
}

/// Held for the duration of one write. Dropping it releases the key.
#[derive(Debug)]
pub struct WritePermit {
    key: RegionScopedKey,
    lock: KeyLock,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<HashMap<RegionScopedKey, KeyLock>>>,
}

impl WriteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other write holds `key`, then take it.
    pub async fn acquire(&self, key: &RegionScopedKey) -> VitrineResult<WritePermit> {
        let lock = {
            let mut locks = self.locks.lock().map_err(|_| StorageError::LockPoisoned)?;
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        Ok(WritePermit {
            key: key.clone(),
            lock,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        })
    }

    /// Number of keys with a write in progress or waiting.
    pub fn active_keys(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl Drop for WritePermit {
    fn drop(&mut self) {
        self.guard.take();
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // Registry plus this permit: nobody else is waiting on the key.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

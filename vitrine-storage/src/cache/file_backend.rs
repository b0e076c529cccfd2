//! Fallback tier: a flat JSON document of string keys.
//!
//! The document may be shared with other application data, so cache entries
//! live under the `vitrine:` prefix and only those keys are ever touched by
//! `clear`. Every mutation rewrites the document through a temporary file and
//! a rename, and only replaces the in-memory copy once that write succeeded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use vitrine_core::constants::FALLBACK_KEY_PREFIX;
use vitrine_core::{CacheRegion, EpochMillis, StorageError, TierKind, VitrineResult};

use super::region_key::RegionScopedKey;
use super::traits::{CacheTier, CleanupMetadata, StoredEntry};

/// Slot for cleanup bookkeeping. The empty region keeps it from ever
/// decoding as an entry key.
const METADATA_KEY: &str = "vitrine::cleanup";

type Document = BTreeMap<String, Value>;

/// Key/value fallback store, optionally backed by a file.
pub struct FileCacheBackend {
    path: Option<PathBuf>,
    document: Mutex<Document>,
}

impl FileCacheBackend {
    /// Open the document at `path`, creating parent directories as needed.
    ///
    /// A missing file starts empty. A file that cannot be parsed is logged
    /// and replaced on the next write.
    pub fn open(path: impl AsRef<Path>) -> VitrineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StorageError::from)?;
        }
        let document = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Document>(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "fallback document unreadable, starting empty");
                Document::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::new(),
            Err(e) => return Err(StorageError::from(e).into()),
        };
        Ok(Self {
            path: Some(path),
            document: Mutex::new(document),
        })
    }

    /// A fallback store that lives only as long as the process.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            document: Mutex::new(Document::new()),
        }
    }

    fn lock(&self) -> VitrineResult<MutexGuard<'_, Document>> {
        self.document
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn persist(&self, document: &Document) -> VitrineResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(document).map_err(StorageError::from)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(|e| StorageError::WriteFailed {
            tier: TierKind::Fallback,
            reason: e.to_string(),
        })?;
        std::fs::rename(&tmp, path).map_err(|e| StorageError::WriteFailed {
            tier: TierKind::Fallback,
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Persist `next` and only then make it the live document.
    fn replace(&self, live: &mut Document, next: Document) -> VitrineResult<()> {
        self.persist(&next)?;
        *live = next;
        Ok(())
    }

    /// Apply `change` to a copy of the document and swap the copy in once
    /// it is on disk. On failure the live document is untouched.
    fn mutate<R>(&self, change: impl FnOnce(&mut Document) -> R) -> VitrineResult<R> {
        let mut document = self.lock()?;
        let mut next = document.clone();
        let result = change(&mut next);
        self.replace(&mut document, next)?;
        Ok(result)
    }

    /// Remove every key for which `doomed` holds and persist once.
    fn remove_where<F>(&self, mut doomed: F) -> VitrineResult<Vec<String>>
    where
        F: FnMut(&str, &Value) -> bool,
    {
        let mut document = self.lock()?;
        let keys: Vec<String> = document
            .iter()
            .filter(|(k, v)| doomed(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        if keys.is_empty() {
            return Ok(keys);
        }
        let mut next = document.clone();
        for key in &keys {
            next.remove(key);
        }
        self.replace(&mut document, next)?;
        Ok(keys)
    }
}

fn is_entry_key(key: &str) -> bool {
    key.starts_with(FALLBACK_KEY_PREFIX) && key != METADATA_KEY
}

#[async_trait]
impl CacheTier for FileCacheBackend {
    fn kind(&self) -> TierKind {
        TierKind::Fallback
    }

    async fn read(&self, key: &RegionScopedKey) -> VitrineResult<Option<StoredEntry>> {
        let raw = self.lock()?.get(&key.fallback_key()).cloned();
        match raw {
            Some(value) => Ok(Some(
                serde_json::from_value(value).map_err(StorageError::from)?,
            )),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &RegionScopedKey, entry: &StoredEntry) -> VitrineResult<()> {
        let value = serde_json::to_value(entry).map_err(StorageError::from)?;
        self.mutate(|document| {
            document.insert(key.fallback_key(), value);
        })
    }

    async fn delete(&self, key: &RegionScopedKey) -> VitrineResult<bool> {
        let fallback_key = key.fallback_key();
        let mut document = self.lock()?;
        if !document.contains_key(&fallback_key) {
            return Ok(false);
        }
        let mut next = document.clone();
        next.remove(&fallback_key);
        self.replace(&mut document, next)?;
        Ok(true)
    }

    async fn delete_region(&self, region: &CacheRegion) -> VitrineResult<u64> {
        let prefix = format!(
            "{}{}",
            FALLBACK_KEY_PREFIX,
            RegionScopedKey::region_prefix(region)
        );
        let removed = self.remove_where(|k, _| k.starts_with(&prefix))?;
        Ok(removed.len() as u64)
    }

    async fn clear(&self) -> VitrineResult<u64> {
        let removed = self.remove_where(|k, _| is_entry_key(k))?;
        Ok(removed.len() as u64)
    }

    async fn sweep_expired(&self, now: EpochMillis) -> VitrineResult<Vec<RegionScopedKey>> {
        let removed = self.remove_where(|k, v| {
            is_entry_key(k)
                && serde_json::from_value::<StoredEntry>(v.clone())
                    .map(|entry| entry.is_expired(now))
                    .unwrap_or(true)
        })?;
        Ok(removed
            .iter()
            .filter_map(|k| k.strip_prefix(FALLBACK_KEY_PREFIX))
            .filter_map(RegionScopedKey::decode)
            .collect())
    }

    async fn len(&self) -> VitrineResult<u64> {
        Ok(self.lock()?.keys().filter(|k| is_entry_key(k)).count() as u64)
    }

    async fn load_metadata(&self) -> VitrineResult<Option<CleanupMetadata>> {
        let raw = self.lock()?.get(METADATA_KEY).cloned();
        match raw {
            Some(value) => Ok(Some(
                serde_json::from_value(value).map_err(StorageError::from)?,
            )),
            None => Ok(None),
        }
    }

    async fn store_metadata(&self, metadata: &CleanupMetadata) -> VitrineResult<()> {
        let value = serde_json::to_value(metadata).map_err(StorageError::from)?;
        self.mutate(|document| {
            document.insert(METADATA_KEY.to_string(), value);
        })
    }
}

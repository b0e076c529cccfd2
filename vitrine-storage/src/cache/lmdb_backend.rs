//! LMDB-backed persistent tier.
//!
//! Uses the heed crate (Rust bindings for LMDB). Entries survive process
//! restarts.
//!
//! # Layout
//!
//! Three named databases in one environment:
//! - `entries`: composite `region:key` → JSON-encoded [`StoredEntry`]
//! - `by_timestamp`: `[timestamp: 8 bytes BE][composite key]` → empty,
//!   an index that lets the cleanup sweep walk entries oldest first
//! - `meta`: the single `cleanup` slot holding [`CleanupMetadata`]
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions; every
//! mutation updates `entries` and `by_timestamp` in one write transaction.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use vitrine_core::{
    CacheRegion, EpochMillis, StorageError, TierKind, VitrineError, VitrineResult,
};

use super::region_key::RegionScopedKey;
use super::traits::{CacheTier, CleanupMetadata, StoredEntry};

const METADATA_KEY: &[u8] = b"cleanup";

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for VitrineError {
    fn from(e: LmdbCacheError) -> Self {
        let reason = e.to_string();
        let err = match e {
            LmdbCacheError::EnvOpen(_) | LmdbCacheError::DbOpen(_) => {
                StorageError::TierUnavailable {
                    tier: TierKind::Persistent,
                    reason,
                }
            }
            LmdbCacheError::Serialization(_) | LmdbCacheError::Deserialization(_) => {
                StorageError::Serialization { reason }
            }
            LmdbCacheError::Transaction(_) | LmdbCacheError::Io(_) => StorageError::WriteFailed {
                tier: TierKind::Persistent,
                reason,
            },
        };
        VitrineError::Storage(err)
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Encode the timestamp index key for an entry.
fn index_key(timestamp: EpochMillis, composite: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + composite.len());
    bytes.extend_from_slice(&(timestamp.max(0) as u64).to_be_bytes());
    bytes.extend_from_slice(composite);
    bytes
}

/// Split an index key back into its composite key.
fn composite_from_index(index: &[u8]) -> Option<&[u8]> {
    index.get(8..)
}

/// Keys picked by the read phase of a sweep.
#[derive(Debug, Default)]
struct SweepCandidates {
    expired: Vec<Vec<u8>>,
    dangling: Vec<Vec<u8>>,
}

/// Persistent cache tier on LMDB.
///
/// # Example
///
/// ```ignore
/// let tier = LmdbCacheBackend::new("/var/cache/vitrine", 64)?;
/// let key = RegionScopedKey::new(CacheRegion::PRODUCTS, "p1")?;
/// tier.write(&key, &CacheEntry::new(json!({"title": "Lamp"}), 1, 60_000)).await?;
/// ```
pub struct LmdbCacheBackend {
    env: Env,
    entries: Database<Bytes, Bytes>,
    by_timestamp: Database<Bytes, Bytes>,
    meta: Database<Bytes, Bytes>,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or its databases cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the files are not modified by anything else while it is open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(3)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let entries: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("entries"))
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        let by_timestamp: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("by_timestamp"))
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        let meta: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("meta"))
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            entries,
            by_timestamp,
            meta,
        })
    }

    fn decode_entry(bytes: &[u8]) -> Result<StoredEntry, LmdbCacheError> {
        serde_json::from_slice(bytes).map_err(|e| LmdbCacheError::Deserialization(e.to_string()))
    }

    /// Remove an entry and its index record inside `wtxn`.
    fn delete_in(&self, wtxn: &mut RwTxn<'_>, composite: &[u8]) -> Result<bool, LmdbCacheError> {
        let existing = match self.entries.get(wtxn, composite).map_err(txn_err)? {
            Some(bytes) => Some(Self::decode_entry(bytes).map(|e| e.timestamp)),
            None => None,
        };
        match existing {
            Some(Ok(timestamp)) => {
                self.by_timestamp
                    .delete(wtxn, &index_key(timestamp, composite))
                    .map_err(txn_err)?;
            }
            // Undecodable entries still get removed; their index record is
            // left for the sweep, which drops dangling index keys.
            Some(Err(_)) | None => {}
        }
        self.entries.delete(wtxn, composite).map_err(txn_err)
    }

    /// Iterate over keys matching a prefix and collect them.
    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut keys = Vec::new();
        for result in self.entries.iter(&rtxn).map_err(txn_err)? {
            match result {
                Ok((key, _)) => {
                    if key.starts_with(prefix) {
                        keys.push(key.to_vec());
                    }
                }
                Err(_) => continue,
            }
        }
        Ok(keys)
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in keys {
            if self.delete_in(&mut wtxn, key)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    /// Walk the timestamp index oldest first and collect expired or
    /// undecodable entries plus index records whose entry is gone.
    fn expired_candidates(&self, now: EpochMillis) -> Result<SweepCandidates, LmdbCacheError> {
        let mut candidates = SweepCandidates::default();
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        for result in self.by_timestamp.iter(&rtxn).map_err(txn_err)? {
            let Ok((index, _)) = result else { continue };
            let Some(composite) = composite_from_index(index) else {
                candidates.dangling.push(index.to_vec());
                continue;
            };
            match self.entries.get(&rtxn, composite).map_err(txn_err)? {
                Some(bytes) => match Self::decode_entry(bytes) {
                    Ok(entry) if entry.is_expired(now) => candidates.expired.push(composite.to_vec()),
                    Ok(_) => {}
                    Err(_) => candidates.expired.push(composite.to_vec()),
                },
                None => candidates.dangling.push(index.to_vec()),
            }
        }
        Ok(candidates)
    }

    /// Delete the candidates that are still expired in the write
    /// transaction. A key rewritten since the scan is left alone.
    fn delete_candidates(
        &self,
        candidates: SweepCandidates,
        now: EpochMillis,
    ) -> Result<Vec<RegionScopedKey>, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        for index in &candidates.dangling {
            let live = match composite_from_index(index) {
                Some(composite) => match self.entries.get(&wtxn, composite).map_err(txn_err)? {
                    Some(bytes) => Self::decode_entry(bytes)
                        .map(|entry| index_key(entry.timestamp, composite) == *index)
                        .unwrap_or(false),
                    None => false,
                },
                None => false,
            };
            if !live {
                self.by_timestamp.delete(&mut wtxn, index).map_err(txn_err)?;
            }
        }

        let mut removed = Vec::with_capacity(candidates.expired.len());
        for composite in &candidates.expired {
            let still_expired = match self.entries.get(&wtxn, composite).map_err(txn_err)? {
                Some(bytes) => Self::decode_entry(bytes)
                    .map(|entry| entry.is_expired(now))
                    .unwrap_or(true),
                None => false,
            };
            if !still_expired || !self.delete_in(&mut wtxn, composite)? {
                continue;
            }
            if let Some(key) = std::str::from_utf8(composite)
                .ok()
                .and_then(RegionScopedKey::decode)
            {
                removed.push(key);
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(removed)
    }
}

#[async_trait]
impl CacheTier for LmdbCacheBackend {
    fn kind(&self) -> TierKind {
        TierKind::Persistent
    }

    async fn read(&self, key: &RegionScopedKey) -> VitrineResult<Option<StoredEntry>> {
        let composite = key.encode();
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self
            .entries
            .get(&rtxn, composite.as_bytes())
            .map_err(txn_err)?
        {
            Some(bytes) => Ok(Some(Self::decode_entry(bytes)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &RegionScopedKey, entry: &StoredEntry) -> VitrineResult<()> {
        let composite = key.encode();
        let value = serde_json::to_vec(entry)
            .map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.delete_in(&mut wtxn, composite.as_bytes())?;
        self.entries
            .put(&mut wtxn, composite.as_bytes(), &value)
            .map_err(txn_err)?;
        self.by_timestamp
            .put(&mut wtxn, &index_key(entry.timestamp, composite.as_bytes()), &[])
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn delete(&self, key: &RegionScopedKey) -> VitrineResult<bool> {
        let composite = key.encode();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self.delete_in(&mut wtxn, composite.as_bytes())?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    async fn delete_region(&self, region: &CacheRegion) -> VitrineResult<u64> {
        let prefix = RegionScopedKey::region_prefix(region);
        let keys = self.collect_keys_with_prefix(prefix.as_bytes())?;
        Ok(self.delete_keys(&keys)?)
    }

    async fn clear(&self) -> VitrineResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let count = self.entries.len(&wtxn).map_err(txn_err)?;
        self.entries.clear(&mut wtxn).map_err(txn_err)?;
        self.by_timestamp.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(count)
    }

    async fn sweep_expired(&self, now: EpochMillis) -> VitrineResult<Vec<RegionScopedKey>> {
        let candidates = self.expired_candidates(now)?;
        Ok(self.delete_candidates(candidates, now)?)
    }

    async fn len(&self) -> VitrineResult<u64> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.entries.len(&rtxn).map_err(txn_err)?)
    }

    async fn load_metadata(&self) -> VitrineResult<Option<CleanupMetadata>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.meta.get(&rtxn, METADATA_KEY).map_err(txn_err)? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(bytes)
                    .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn store_metadata(&self, metadata: &CleanupMetadata) -> VitrineResult<()> {
        let value = serde_json::to_vec(metadata)
            .map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.meta
            .put(&mut wtxn, METADATA_KEY, &value)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }
}

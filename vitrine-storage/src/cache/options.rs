//! Per-call options for reads and writes.

use std::time::Duration;

use vitrine_core::LoadPriority;

/// Options for [`CacheStore::get`](super::CacheStore::get).
///
/// Unset TTL and version fall back to the store's configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub ttl: Option<Duration>,
    pub version: Option<u32>,
    /// Serve a stale value immediately and refresh it in the background.
    pub background: bool,
    /// Skip every tier and go straight to the fetcher.
    pub force_refresh: bool,
    /// Only used to order preload batches.
    pub priority: LoadPriority,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Enable refresh-ahead for this read.
    pub fn in_background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn with_priority(mut self, priority: LoadPriority) -> Self {
        self.priority = priority;
        self
    }

    pub(crate) fn write_options(&self) -> SetOptions {
        SetOptions {
            ttl: self.ttl,
            version: self.version,
        }
    }
}

/// Options for [`CacheStore::set`](super::CacheStore::set).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub version: Option<u32>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }
}

//! Cache regions: logical namespaces used for bulk invalidation and policy.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::REGION_SEPARATOR;
use crate::{ValidationError, VitrineResult};

/// A logical cache namespace.
///
/// A region has no lifecycle of its own; it only prefixes keys. Region names
/// never contain the separator, so a prefix scan for one region cannot match
/// another region's keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheRegion(Cow<'static, str>);

impl CacheRegion {
    /// User profiles. Never served from cache.
    pub const PROFILES: CacheRegion = CacheRegion(Cow::Borrowed("profiles"));
    pub const PRODUCTS: CacheRegion = CacheRegion(Cow::Borrowed("products"));
    pub const SETTINGS: CacheRegion = CacheRegion(Cow::Borrowed("settings"));
    pub const LISTS: CacheRegion = CacheRegion(Cow::Borrowed("lists"));
    pub const FEEDS: CacheRegion = CacheRegion(Cow::Borrowed("feeds"));

    /// Create a region with a caller-chosen name.
    pub fn custom(name: impl Into<String>) -> VitrineResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::InvalidRegion {
                name,
                reason: "region name must not be empty".to_string(),
            }
            .into());
        }
        if name.contains(REGION_SEPARATOR) {
            return Err(ValidationError::InvalidRegion {
                name,
                reason: format!("region name must not contain '{}'", REGION_SEPARATOR),
            }
            .into());
        }
        Ok(Self(Cow::Owned(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Profile data is exempt from caching.
    pub fn is_profile(&self) -> bool {
        self.as_str() == Self::PROFILES.as_str()
    }
}

impl fmt::Display for CacheRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

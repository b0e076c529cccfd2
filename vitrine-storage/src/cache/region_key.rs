//! Region-scoped cache keys.
//!
//! A `RegionScopedKey` can only be built with a region, so every tier stores
//! keys under a region prefix and `clear_region` can find them with a prefix
//! scan.

use vitrine_core::constants::{FALLBACK_KEY_PREFIX, REGION_SEPARATOR};
use vitrine_core::{CacheRegion, ValidationError, VitrineResult};

/// A cache key scoped to a region.
///
/// # Encoding
///
/// The composite form is `"{region}:{key}"`. Region names cannot contain the
/// separator, so the first separator always splits region from key and keys
/// themselves may contain it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionScopedKey {
    region: CacheRegion,
    key: String,
}

impl RegionScopedKey {
    /// Create a key. Empty keys are rejected.
    pub fn new(region: CacheRegion, key: impl Into<String>) -> VitrineResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::EmptyKey.into());
        }
        Ok(Self { region, key })
    }

    pub fn region(&self) -> &CacheRegion {
        &self.region
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encode to the composite `region:key` form used by every tier.
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.region, REGION_SEPARATOR, self.key)
    }

    /// Decode a composite key.
    ///
    /// Returns `None` if there is no separator, either side is empty, or the
    /// region name is invalid.
    pub fn decode(composite: &str) -> Option<Self> {
        let (region, key) = composite.split_once(REGION_SEPARATOR)?;
        if key.is_empty() {
            return None;
        }
        let region = CacheRegion::custom(region).ok()?;
        Some(Self {
            region,
            key: key.to_string(),
        })
    }

    /// Prefix shared by every composite key of `region`.
    pub fn region_prefix(region: &CacheRegion) -> String {
        format!("{}{}", region, REGION_SEPARATOR)
    }

    /// Key under which the fallback tier stores this entry.
    pub fn fallback_key(&self) -> String {
        format!("{}{}", FALLBACK_KEY_PREFIX, self.encode())
    }
}

impl std::fmt::Display for RegionScopedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.region, REGION_SEPARATOR, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_and_getters() {
        let key = RegionScopedKey::new(CacheRegion::PRODUCTS, "p1").unwrap();
        assert_eq!(key.region(), &CacheRegion::PRODUCTS);
        assert_eq!(key.key(), "p1");
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(RegionScopedKey::new(CacheRegion::PRODUCTS, "").is_err());
    }

    #[test]
    fn test_encode() {
        let key = RegionScopedKey::new(CacheRegion::SETTINGS, "app-config").unwrap();
        assert_eq!(key.encode(), "settings:app-config");
        assert_eq!(key.to_string(), key.encode());
    }

    #[test]
    fn test_key_may_contain_separator() {
        let key = RegionScopedKey::new(CacheRegion::LISTS, "category:shoes:page:2").unwrap();
        let decoded = RegionScopedKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(RegionScopedKey::decode("no-separator").is_none());
        assert!(RegionScopedKey::decode("products:").is_none());
        assert!(RegionScopedKey::decode(":orphan").is_none());
    }

    #[test]
    fn test_region_prefix_does_not_match_other_regions() {
        let prefix = RegionScopedKey::region_prefix(&CacheRegion::PRODUCTS);
        let product = RegionScopedKey::new(CacheRegion::PRODUCTS, "a").unwrap();
        let custom = RegionScopedKey::new(CacheRegion::custom("products_archive").unwrap(), "a")
            .unwrap();
        assert!(product.encode().starts_with(&prefix));
        assert!(!custom.encode().starts_with(&prefix));
    }

    #[test]
    fn test_fallback_key_is_namespaced() {
        let key = RegionScopedKey::new(CacheRegion::FEEDS, "home").unwrap();
        assert_eq!(key.fallback_key(), "vitrine:feeds:home");
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(region in "[a-z_]{1,12}", key in "[a-zA-Z0-9:_-]{1,24}") {
            let region = CacheRegion::custom(region).unwrap();
            let original = RegionScopedKey::new(region, key).unwrap();
            prop_assert_eq!(RegionScopedKey::decode(&original.encode()), Some(original));
        }
    }
}

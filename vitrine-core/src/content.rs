//! Content types, load priorities and the typed parameters of each fetch.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_REQUEST_TIMEOUT_MS;

/// Kind of content the loader can fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Profile,
    Product,
    ProductsList,
    Feed,
    Comments,
    Reviews,
    UserRecord,
}

impl ContentType {
    pub const ALL: [ContentType; 7] = [
        ContentType::Profile,
        ContentType::Product,
        ContentType::ProductsList,
        ContentType::Feed,
        ContentType::Comments,
        ContentType::Reviews,
        ContentType::UserRecord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Profile => "profile",
            ContentType::Product => "product",
            ContentType::ProductsList => "products_list",
            ContentType::Feed => "feed",
            ContentType::Comments => "comments",
            ContentType::Reviews => "reviews",
            ContentType::UserRecord => "user_record",
        }
    }

    /// How long a completed load of this type answers identical requests.
    pub fn default_memo_ttl(&self) -> Duration {
        match self {
            ContentType::Profile => Duration::from_secs(10),
            ContentType::Product => Duration::from_secs(60),
            ContentType::ProductsList => Duration::from_secs(30),
            ContentType::Feed => Duration::from_secs(30),
            ContentType::Comments => Duration::from_secs(15),
            ContentType::Reviews => Duration::from_secs(60),
            ContentType::UserRecord => Duration::from_secs(30),
        }
    }

    /// Per-request timeout used when the caller does not set one.
    pub fn default_timeout(&self) -> Duration {
        match self {
            // Lists and feeds aggregate several records on the backend.
            ContentType::ProductsList | ContentType::Feed => {
                Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS * 3 / 2)
            }
            _ => Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load priority. Lower ordinals run first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LoadPriority {
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
    Lazy = 4,
}

impl LoadPriority {
    /// Raise to at least `floor`; never lowers an already more urgent priority.
    pub fn at_least(self, floor: LoadPriority) -> LoadPriority {
        self.min(floor)
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

/// Sort direction for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileParams {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductParams {
    pub product_id: String,
}

/// Filtered and sorted product list.
///
/// Filters are kept in a `BTreeMap` so that identical queries serialize
/// identically regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListQuery {
    pub filters: BTreeMap<String, serde_json::Value>,
    pub sort_by: Option<String>,
    pub sort_direction: SortDirection,
    pub limit: u32,
    pub cursor: Option<String>,
}

impl ListQuery {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters.insert(field.into(), value);
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_by = Some(field.into());
        self.sort_direction = direction;
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FeedQuery {
    /// Personalised feed for this user, or the public feed when absent.
    pub user_id: Option<String>,
    pub cursor: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommentsQuery {
    pub target_id: String,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewsQuery {
    pub product_id: String,
    pub limit: u32,
}

/// A generic record lookup by collection and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRecordParams {
    pub collection: String,
    pub record_id: String,
}

/// Parameters of one load, tagged by content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum LoadParams {
    Profile(ProfileParams),
    Product(ProductParams),
    ProductsList(ListQuery),
    Feed(FeedQuery),
    Comments(CommentsQuery),
    Reviews(ReviewsQuery),
    UserRecord(UserRecordParams),
}

impl LoadParams {
    pub fn profile(user_id: impl Into<String>) -> Self {
        LoadParams::Profile(ProfileParams {
            user_id: user_id.into(),
        })
    }

    pub fn product(product_id: impl Into<String>) -> Self {
        LoadParams::Product(ProductParams {
            product_id: product_id.into(),
        })
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            LoadParams::Profile(_) => ContentType::Profile,
            LoadParams::Product(_) => ContentType::Product,
            LoadParams::ProductsList(_) => ContentType::ProductsList,
            LoadParams::Feed(_) => ContentType::Feed,
            LoadParams::Comments(_) => ContentType::Comments,
            LoadParams::Reviews(_) => ContentType::Reviews,
            LoadParams::UserRecord(_) => ContentType::UserRecord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_ordering() {
        assert!(LoadPriority::Critical < LoadPriority::High);
        assert!(LoadPriority::High < LoadPriority::Medium);
        assert!(LoadPriority::Medium < LoadPriority::Low);
        assert!(LoadPriority::Low < LoadPriority::Lazy);
        assert_eq!(LoadPriority::default(), LoadPriority::Medium);
    }

    #[test]
    fn test_at_least_never_lowers() {
        assert_eq!(LoadPriority::Low.at_least(LoadPriority::High), LoadPriority::High);
        assert_eq!(
            LoadPriority::Critical.at_least(LoadPriority::High),
            LoadPriority::Critical
        );
    }

    #[test]
    fn test_params_content_type() {
        assert_eq!(LoadParams::product("p1").content_type(), ContentType::Product);
        assert_eq!(LoadParams::profile("u1").content_type(), ContentType::Profile);
        assert_eq!(
            LoadParams::ProductsList(ListQuery::new(20)).content_type(),
            ContentType::ProductsList
        );
    }

    #[test]
    fn test_list_query_serializes_filters_in_key_order() {
        let a = ListQuery::new(10)
            .with_filter("category", json!("shoes"))
            .with_filter("brand", json!("acme"));
        let b = ListQuery::new(10)
            .with_filter("brand", json!("acme"))
            .with_filter("category", json!("shoes"));
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_load_params_tagged_layout() {
        let json = serde_json::to_value(LoadParams::product("p9")).unwrap();
        assert_eq!(json["type"], "product");
        assert_eq!(json["params"]["product_id"], "p9");
    }

    #[test]
    fn test_every_content_type_has_a_name() {
        for ct in ContentType::ALL {
            assert!(!ct.as_str().is_empty());
            assert!(ct.default_timeout() > Duration::ZERO);
        }
    }
}

//! The seam between the loader and the outside world.
//!
//! The loader knows nothing about where content comes from. An application
//! implements [`ContentFetcher`] for the content types it serves; every
//! method it leaves out reports [`FetchError::Unsupported`].

use async_trait::async_trait;
use serde_json::Value;
use vitrine_core::{
    CommentsQuery, ContentType, FeedQuery, FetchError, ListQuery, LoadParams, ProductParams,
    ProfileParams, ReviewsQuery, UserRecordParams, VitrineResult,
};

fn unsupported(content_type: ContentType) -> VitrineResult<Value> {
    Err(FetchError::Unsupported { content_type }.into())
}

/// One async fetch routine per content type.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_profile(&self, _params: &ProfileParams) -> VitrineResult<Value> {
        unsupported(ContentType::Profile)
    }

    async fn fetch_product(&self, _params: &ProductParams) -> VitrineResult<Value> {
        unsupported(ContentType::Product)
    }

    async fn fetch_products_list(&self, _query: &ListQuery) -> VitrineResult<Value> {
        unsupported(ContentType::ProductsList)
    }

    async fn fetch_feed(&self, _query: &FeedQuery) -> VitrineResult<Value> {
        unsupported(ContentType::Feed)
    }

    async fn fetch_comments(&self, _query: &CommentsQuery) -> VitrineResult<Value> {
        unsupported(ContentType::Comments)
    }

    async fn fetch_reviews(&self, _query: &ReviewsQuery) -> VitrineResult<Value> {
        unsupported(ContentType::Reviews)
    }

    async fn fetch_user_record(&self, _params: &UserRecordParams) -> VitrineResult<Value> {
        unsupported(ContentType::UserRecord)
    }
}

/// Route `params` to the matching fetch routine.
pub async fn dispatch(fetcher: &dyn ContentFetcher, params: &LoadParams) -> VitrineResult<Value> {
    match params {
        LoadParams::Profile(p) => fetcher.fetch_profile(p).await,
        LoadParams::Product(p) => fetcher.fetch_product(p).await,
        LoadParams::ProductsList(q) => fetcher.fetch_products_list(q).await,
        LoadParams::Feed(q) => fetcher.fetch_feed(q).await,
        LoadParams::Comments(q) => fetcher.fetch_comments(q).await,
        LoadParams::Reviews(q) => fetcher.fetch_reviews(q).await,
        LoadParams::UserRecord(p) => fetcher.fetch_user_record(p).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vitrine_core::VitrineError;

    struct ProductsOnly;

    #[async_trait]
    impl ContentFetcher for ProductsOnly {
        async fn fetch_product(&self, params: &ProductParams) -> VitrineResult<Value> {
            Ok(json!({ "id": params.product_id }))
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_variant() {
        let value = dispatch(&ProductsOnly, &LoadParams::product("p1")).await.unwrap();
        assert_eq!(value["id"], "p1");
    }

    #[tokio::test]
    async fn test_missing_routine_is_unsupported() {
        let err = dispatch(&ProductsOnly, &LoadParams::profile("u1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            VitrineError::Fetch(FetchError::Unsupported {
                content_type: ContentType::Profile
            })
        );
    }
}

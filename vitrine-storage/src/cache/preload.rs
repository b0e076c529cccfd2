//! Preload batches: warm the cache for a list of keys ahead of use.

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use vitrine_core::{CacheRegion, LoadPriority, VitrineResult};

use super::options::GetOptions;

/// A boxed zero-argument fetcher.
pub type BoxedFetcher<T> = Box<dyn FnOnce() -> BoxFuture<'static, VitrineResult<T>> + Send>;

/// One key to warm, with the fetcher that produces it on a miss.
pub struct PreloadItem<T> {
    pub region: CacheRegion,
    pub key: String,
    pub fetcher: BoxedFetcher<T>,
    pub options: GetOptions,
}

impl<T: 'static> PreloadItem<T> {
    pub fn new<F, Fut>(region: CacheRegion, key: impl Into<String>, fetcher: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = VitrineResult<T>> + Send + 'static,
    {
        Self {
            region,
            key: key.into(),
            fetcher: Box::new(move || fetcher().boxed()),
            options: GetOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GetOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_priority(mut self, priority: LoadPriority) -> Self {
        self.options.priority = priority;
        self
    }

    pub fn priority(&self) -> LoadPriority {
        self.options.priority
    }
}

impl<T> std::fmt::Debug for PreloadItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadItem")
            .field("region", &self.region)
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Outcome of a preload call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// Items now present in the cache (hit or fetched).
    pub loaded: usize,
    /// Items whose read or fetch failed.
    pub failed: usize,
}

impl PreloadReport {
    pub fn total(&self) -> usize {
        self.loaded + self.failed
    }
}

/// Stable sort by priority, most urgent first.
pub(crate) fn order_by_priority<T: 'static>(items: &mut [PreloadItem<T>]) {
    items.sort_by_key(|item| item.priority());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str, priority: LoadPriority) -> PreloadItem<u32> {
        PreloadItem::new(CacheRegion::PRODUCTS, key, || async { Ok(1) }).with_priority(priority)
    }

    #[test]
    fn test_order_is_stable_within_priority() {
        let mut items = vec![
            item("lazy", LoadPriority::Lazy),
            item("first-high", LoadPriority::High),
            item("critical", LoadPriority::Critical),
            item("second-high", LoadPriority::High),
        ];
        order_by_priority(&mut items);
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["critical", "first-high", "second-high", "lazy"]);
    }

    #[tokio::test]
    async fn test_boxed_fetcher_runs() {
        let item = item("p", LoadPriority::Medium);
        assert_eq!((item.fetcher)().await.unwrap(), 1);
    }
}

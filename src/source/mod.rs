//! Per-source fetcher contract.
//!
//! A source knows how to turn one fetch request into a stream of article
//! metadata, delivered through an [`ArticleSink`]. The orchestrator and the
//! foreground loader both sit behind this seam, so sources never touch the
//! store or the tracking index directly.

pub mod catalog;
pub mod rss;

pub use catalog::{CatalogSource, FeedEndpoint};
pub use rss::RssFetcher;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::app::Result;
use crate::client::HttpClient;
use crate::domain::CachedArticle;

/// What a source needs to perform one fetch.
#[derive(Debug, Clone, Default)]
pub struct SourceRequest {
    /// Feed id the delivered articles are cached under.
    pub feed_id: String,
    pub category_id: Option<String>,
    /// Feed URL, for syndication sources.
    pub url: Option<String>,
    /// Display-name override for the source.
    pub name: Option<String>,
}

/// Receives what a source produces. Implementations must tolerate calls from
/// any task.
pub trait ArticleSink: Send + Sync {
    /// Source-resolved display label for the loaded feed.
    fn set_label(&self, label: &str);
    /// Previously delivered items for this load are stale; drop them.
    fn clear_items(&self);
    fn add_item(&self, article: CachedArticle);
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Provider key this fetcher answers to.
    fn provider(&self) -> &str;

    /// Fetch one request, delivering into `sink`. An error means the whole
    /// request produced nothing usable.
    async fn fetch(&self, request: &SourceRequest, sink: &dyn ArticleSink) -> Result<()>;
}

/// Maps provider keys to fetchers. The built-in syndication fetcher is always
/// present and also serves plain feed-URL requests that name no provider.
pub struct SourceRegistry {
    syndication: Arc<RssFetcher>,
    providers: HashMap<String, Arc<dyn SourceFetcher>>,
}

impl SourceRegistry {
    pub fn new(client: HttpClient) -> Self {
        let syndication = Arc::new(RssFetcher::new(client));
        let mut providers: HashMap<String, Arc<dyn SourceFetcher>> = HashMap::new();
        providers.insert(
            syndication.provider().to_string(),
            syndication.clone() as Arc<dyn SourceFetcher>,
        );
        Self {
            syndication,
            providers,
        }
    }

    pub fn register(&mut self, fetcher: Arc<dyn SourceFetcher>) {
        self.providers
            .insert(fetcher.provider().to_string(), fetcher);
    }

    pub fn find(&self, provider: &str) -> Option<Arc<dyn SourceFetcher>> {
        self.providers.get(provider).cloned()
    }

    pub fn syndication(&self) -> Arc<dyn SourceFetcher> {
        self.syndication.clone() as Arc<dyn SourceFetcher>
    }
}

/// Sink that buffers everything in memory. Used by the foreground loader and
/// in tests.
#[derive(Default)]
pub struct CollectingSink {
    label: Mutex<Option<String>>,
    items: Mutex<Vec<CachedArticle>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&self) -> Option<String> {
        self.label
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn items(&self) -> Vec<CachedArticle> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take_items(&self) -> Vec<CachedArticle> {
        std::mem::take(&mut self.items.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ArticleSink for CollectingSink {
    fn set_label(&self, label: &str) {
        *self.label.lock().unwrap_or_else(PoisonError::into_inner) = Some(label.to_string());
    }

    fn clear_items(&self) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn add_item(&self, article: CachedArticle) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(article);
    }
}

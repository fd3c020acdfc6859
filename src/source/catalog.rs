use std::collections::HashMap;

use async_trait::async_trait;

use crate::app::{Result, TributaryError};
use crate::client::HttpClient;
use crate::domain::CachedArticle;
use crate::source::rss::RssFetcher;
use crate::source::{ArticleSink, SourceFetcher, SourceRequest};

pub const CATALOG_PROVIDER: &str = "catalog";

#[derive(Debug, Clone)]
pub struct FeedEndpoint {
    pub url: String,
    pub name: Option<String>,
}

/// Category provider backed by a fixed catalog of feed URLs per category id.
/// Fetching a category pulls every feed listed under it and aggregates the
/// results; one bad feed degrades the category, it does not fail it.
pub struct CatalogSource {
    syndication: RssFetcher,
    categories: HashMap<String, Vec<FeedEndpoint>>,
}

impl CatalogSource {
    pub fn new(client: HttpClient, categories: HashMap<String, Vec<FeedEndpoint>>) -> Self {
        Self {
            syndication: RssFetcher::new(client),
            categories,
        }
    }

    pub fn category_ids(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }
}

/// Forwards deliveries but swallows `clear_items`, so aggregating several
/// feeds into one sink keeps earlier feeds' items.
struct AppendOnly<'a> {
    inner: &'a dyn ArticleSink,
}

impl ArticleSink for AppendOnly<'_> {
    fn set_label(&self, label: &str) {
        self.inner.set_label(label);
    }

    fn clear_items(&self) {}

    fn add_item(&self, article: CachedArticle) {
        self.inner.add_item(article);
    }
}

#[async_trait]
impl SourceFetcher for CatalogSource {
    fn provider(&self) -> &str {
        CATALOG_PROVIDER
    }

    async fn fetch(&self, request: &SourceRequest, sink: &dyn ArticleSink) -> Result<()> {
        let category_id = request.category_id.as_deref().ok_or_else(|| {
            TributaryError::Fetch("catalog fetch needs a category id".into())
        })?;
        let endpoints = self
            .categories
            .get(category_id)
            .filter(|endpoints| !endpoints.is_empty())
            .ok_or_else(|| {
                TributaryError::Fetch(format!("no feeds cataloged for category {category_id}"))
            })?;

        sink.clear_items();
        let aggregate = AppendOnly { inner: sink };

        // Endpoint fetches run concurrently; the client's semaphore is the
        // real throttle.
        let fetches = endpoints.iter().map(|endpoint| {
            let aggregate = &aggregate;
            async move {
                let sub_request = SourceRequest {
                    feed_id: request.feed_id.clone(),
                    category_id: request.category_id.clone(),
                    url: Some(endpoint.url.clone()),
                    name: endpoint.name.clone(),
                };
                let outcome = self.syndication.fetch(&sub_request, aggregate).await;
                if let Err(e) = &outcome {
                    tracing::warn!(category_id, url = %endpoint.url, error = %e, "catalog feed failed");
                }
                outcome
            }
        });

        let mut delivered_any = false;
        let mut last_error = None;
        for outcome in futures::future::join_all(fetches).await {
            match outcome {
                Ok(()) => delivered_any = true,
                Err(e) => last_error = Some(e),
            }
        }

        if delivered_any {
            Ok(())
        } else {
            Err(last_error
                .unwrap_or_else(|| TributaryError::Fetch(format!("category {category_id} empty"))))
        }
    }
}

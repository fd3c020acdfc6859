//! Foreground feed loading.
//!
//! User-visible loads race against navigation: when a newer load begins, any
//! older one must drop its continuations, store writes included, instead of
//! clobbering the screen the user is now on. Each load takes a token from a
//! shared [`CancelSource`] and checks it after every await point that leads
//! to observable work.

use std::sync::Arc;

use crate::app::{Result, TributaryError};
use crate::cancel::CancelSource;
use crate::domain::CachedArticle;
use crate::source::{CollectingSink, SourceFetcher, SourceRegistry, SourceRequest};
use crate::store::ArticleStore;

#[derive(Debug)]
pub enum LoadOutcome {
    /// The load finished; its articles are cached and ready to show.
    Loaded {
        label: Option<String>,
        articles: Vec<CachedArticle>,
    },
    /// A newer load superseded this one before it finished.
    Cancelled,
}

#[derive(Clone)]
pub struct ForegroundFetch {
    registry: Arc<SourceRegistry>,
    store: Arc<dyn ArticleStore + Send + Sync>,
    cancel: CancelSource,
}

impl ForegroundFetch {
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<dyn ArticleStore + Send + Sync>,
    ) -> Self {
        Self {
            registry,
            store,
            cancel: CancelSource::new(),
        }
    }

    /// Load one feed URL, caching what arrives under `feed_id`.
    pub async fn load_feed(
        &self,
        feed_id: &str,
        url: &str,
        name: Option<&str>,
    ) -> Result<LoadOutcome> {
        let request = SourceRequest {
            feed_id: feed_id.to_string(),
            category_id: None,
            url: Some(url.to_string()),
            name: name.map(String::from),
        };
        self.run(self.registry.syndication(), request).await
    }

    /// Load a category listing through a registered provider.
    pub async fn load_category(&self, provider: &str, category_id: &str) -> Result<LoadOutcome> {
        let fetcher = self
            .registry
            .find(provider)
            .ok_or_else(|| TributaryError::UnknownSource(provider.to_string()))?;
        let request = SourceRequest {
            feed_id: category_id.to_string(),
            category_id: Some(category_id.to_string()),
            url: None,
            name: None,
        };
        self.run(fetcher, request).await
    }

    /// Invalidate whatever load is currently in flight.
    pub fn cancel_pending(&self) {
        self.cancel.begin();
    }

    async fn run(
        &self,
        fetcher: Arc<dyn SourceFetcher>,
        request: SourceRequest,
    ) -> Result<LoadOutcome> {
        let token = self.cancel.begin();
        let sink = CollectingSink::new();

        fetcher.fetch(&request, &sink).await?;

        if token.is_cancelled() {
            tracing::debug!(feed_id = %request.feed_id, "load superseded, dropping fetched articles");
            return Ok(LoadOutcome::Cancelled);
        }

        let articles = sink.take_items();
        let mut cached = 0usize;
        for article in &articles {
            if self.store.cache_article(article) {
                cached += 1;
            }
        }
        tracing::debug!(feed_id = %request.feed_id, cached, "foreground load cached articles");

        if token.is_cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }
        Ok(LoadOutcome::Loaded {
            label: sink.label(),
            articles,
        })
    }
}

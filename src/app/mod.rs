//! Application wiring.
//!
//! [`AppContext`] owns every long-lived component and hands them to whoever
//! drives the app. Components receive their collaborators at construction
//! instead of reaching for globals, so tests can assemble a context around
//! in-memory stores and scripted sources.

pub mod error;

pub use error::{Result, TributaryError};

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use crate::cache::LruCache;
use crate::client::{FetchOptions, HttpClient};
use crate::config::Config;
use crate::domain::FRONTPAGE_FEED_ID;
use crate::foreground::ForegroundFetch;
use crate::orchestrator::{FetchOrchestrator, FetchTask, FollowedCategories, RefreshPlan};
use crate::source::{catalog::CATALOG_PROVIDER, CatalogSource, SourceRegistry};
use crate::store::SqliteArticleStore;
use crate::tracking::TrackingIndex;

pub struct AppContext {
    pub config: Config,
    pub client: HttpClient,
    pub store: Arc<SqliteArticleStore>,
    pub tracking: TrackingIndex,
    pub registry: Arc<SourceRegistry>,
    pub orchestrator: FetchOrchestrator,
    pub foreground: ForegroundFetch,
    media: LruCache<String, Bytes>,
}

impl AppContext {
    /// Build the full context from configuration, with on-disk state under
    /// the platform data directory.
    pub fn new(config: Config) -> Result<Self> {
        let db_path = match &config.store.path {
            Some(path) => path.clone(),
            None => Self::default_data_path("articles.sqlite")?,
        };
        let store = Arc::new(SqliteArticleStore::open(&db_path));
        let tracking = TrackingIndex::load_from(Self::default_data_path("tracking.json")?);
        Ok(Self::assemble(config, store, tracking))
    }

    /// Context with no filesystem footprint.
    pub fn in_memory(config: Config) -> Self {
        Self::assemble(
            config,
            Arc::new(SqliteArticleStore::in_memory()),
            TrackingIndex::in_memory(),
        )
    }

    fn assemble(config: Config, store: Arc<SqliteArticleStore>, tracking: TrackingIndex) -> Self {
        let client = HttpClient::new(&config.http.to_http_config());

        let mut categories = config.sources.by_category();
        // The front page aggregates every configured feed.
        categories.insert(FRONTPAGE_FEED_ID.to_string(), config.sources.all_endpoints());
        let catalog = CatalogSource::new(client.clone(), categories);

        let registry = {
            let mut registry = SourceRegistry::new(client.clone());
            registry.register(Arc::new(catalog));
            Arc::new(registry)
        };

        let personalization = Arc::new(FollowedCategories::new(
            config.my_feed.followed_categories.iter().cloned(),
        ));
        let orchestrator = FetchOrchestrator::new(
            registry.clone(),
            store.clone(),
            tracking.clone(),
            personalization,
            config.orchestrator.to_orchestrator_config(),
        );
        let foreground = ForegroundFetch::new(registry.clone(), store.clone());
        let media = LruCache::new(config.media.cache_capacity);

        Self {
            config,
            client,
            store,
            tracking,
            registry,
            orchestrator,
            foreground,
            media,
        }
    }

    fn default_data_path(file: &str) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| TributaryError::Config("Could not find data directory".into()))?;
        let tributary_dir = data_dir.join("tributary");
        std::fs::create_dir_all(&tributary_dir)?;
        Ok(tributary_dir.join(file))
    }

    /// Tasks for a full background refresh: the front page ahead of
    /// everything, then each category, then the individual feeds. Feeds that
    /// also back a category resolve to the same URLs, which the client's
    /// request sharing collapses into single fetches.
    pub fn refresh_plan(&self) -> RefreshPlan {
        let priority = vec![FetchTask::Category {
            provider: CATALOG_PROVIDER.to_string(),
            category_id: FRONTPAGE_FEED_ID.to_string(),
        }];

        let mut rest: Vec<FetchTask> = self
            .config
            .sources
            .category_ids()
            .into_iter()
            .map(|category_id| FetchTask::Category {
                provider: CATALOG_PROVIDER.to_string(),
                category_id,
            })
            .collect();
        for entry in &self.config.sources.feeds {
            rest.push(FetchTask::RssFeed {
                url: entry.url.clone(),
                name: entry.name.clone().unwrap_or_default(),
                category_id: entry.category.clone(),
                cache_key: None,
            });
        }
        if let Some(url) = &self.config.my_feed.local_feed_url {
            rest.push(FetchTask::LocalFeed { url: url.clone() });
        }

        RefreshPlan { priority, rest }
    }

    /// Tasks for refreshing just the personalized aggregate.
    pub fn my_feed_plan(&self) -> RefreshPlan {
        let priority: Vec<FetchTask> = self
            .config
            .my_feed
            .followed_categories
            .iter()
            .map(|category_id| FetchTask::Category {
                provider: CATALOG_PROVIDER.to_string(),
                category_id: category_id.clone(),
            })
            .collect();
        let rest = self
            .config
            .my_feed
            .local_feed_url
            .iter()
            .map(|url| FetchTask::LocalFeed { url: url.clone() })
            .collect();

        RefreshPlan { priority, rest }
    }

    /// Fetch a thumbnail or logo, serving repeats from the in-memory cache.
    pub async fn fetch_media(&self, url: &str) -> Option<Bytes> {
        if let Some(bytes) = self.media.get(&url.to_string()) {
            return Some(bytes);
        }

        let response = self.client.fetch(url, &FetchOptions::default()).await;
        if !response.is_success() {
            tracing::debug!(url, status = response.status, "media fetch failed");
            return None;
        }
        let bytes = response.body.clone();
        self.media.insert(url.to_string(), bytes.clone());
        Some(bytes)
    }

    /// Number of media entries currently cached.
    pub fn media_cached(&self) -> usize {
        self.media.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Context assembly spawns the client's delivery task, so even the
    // plan-shape tests need a runtime.
    #[tokio::test]
    async fn test_in_memory_context_assembles() {
        let context = AppContext::in_memory(Config::default());

        assert!(!context.store.is_degraded());
        assert!(context.registry.find(CATALOG_PROVIDER).is_some());
        assert_eq!(context.media_cached(), 0);
    }

    #[tokio::test]
    async fn test_refresh_plan_puts_frontpage_first() {
        let context = AppContext::in_memory(Config::default());
        let plan = context.refresh_plan();

        assert_eq!(
            plan.priority,
            vec![FetchTask::Category {
                provider: CATALOG_PROVIDER.to_string(),
                category_id: FRONTPAGE_FEED_ID.to_string(),
            }]
        );
        // Two categories plus three individual feeds from the default config.
        assert_eq!(plan.rest.len(), 5);
        assert!(matches!(plan.rest[0], FetchTask::Category { .. }));
        assert!(matches!(plan.rest[2], FetchTask::RssFeed { .. }));
    }

    #[tokio::test]
    async fn test_my_feed_plan_covers_followed_categories_and_local_feed() {
        let mut config = Config::default();
        config.my_feed.local_feed_url = Some("https://example.com/mine.xml".to_string());
        let context = AppContext::in_memory(config);

        let plan = context.my_feed_plan();
        assert_eq!(plan.priority.len(), 1);
        assert!(matches!(
            plan.rest.as_slice(),
            [FetchTask::LocalFeed { .. }]
        ));
    }

    #[tokio::test]
    async fn test_fetch_media_caches_and_replays() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logo.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let context = AppContext::in_memory(Config::default());
        let url = format!("{}/logo.png", server.uri());

        let first = context.fetch_media(&url).await;
        assert_eq!(first.as_deref(), Some(b"png-bytes".as_slice()));
        assert_eq!(context.media_cached(), 1);

        // Served from cache; the mock's expect(1) would fail otherwise.
        let second = context.fetch_media(&url).await;
        assert_eq!(second.as_deref(), Some(b"png-bytes".as_slice()));
    }

    #[tokio::test]
    async fn test_fetch_media_does_not_cache_failures() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let context = AppContext::in_memory(Config::default());
        let url = format!("{}/gone.png", server.uri());

        assert!(context.fetch_media(&url).await.is_none());
        assert_eq!(context.media_cached(), 0);
    }
}

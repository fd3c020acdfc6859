//! Background fetch orchestrator.
//!
//! Tasks go into a FIFO queue and are worked off by at most `max_active`
//! concurrent fetches. A slot is released when its task's future resolves
//! (plus a short configurable settle delay), at which point the queue is
//! drained again. Every delivered article flows into the article store and
//! the tracking index through one shared sink, with conditional registration
//! into the personalized aggregate.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::app::{Result, TributaryError};
use crate::domain::{rss_cache_key, CachedArticle, LOCAL_FEED_ID, MY_FEED_ID};
use crate::source::{ArticleSink, SourceRegistry, SourceRequest};
use crate::store::ArticleStore;
use crate::tracking::TrackingIndex;

pub const DEFAULT_MAX_ACTIVE: usize = 3;
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MY_FEED_TIMEOUT: Duration = Duration::from_secs(3);

/// One unit of background work. A task exists only for the run that
/// consumes it; nothing about it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTask {
    /// Fetch a category listing through a registered provider.
    Category {
        provider: String,
        category_id: String,
    },
    /// Fetch one subscribed feed.
    RssFeed {
        url: String,
        name: String,
        category_id: String,
        /// Feed id to cache under; derived from the URL when absent.
        cache_key: Option<String>,
    },
    /// Fetch the user's own local feed.
    LocalFeed { url: String },
}

impl fmt::Display for FetchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTask::Category {
                provider,
                category_id,
            } => write!(f, "category {category_id} via {provider}"),
            FetchTask::RssFeed { url, .. } => write!(f, "feed {url}"),
            FetchTask::LocalFeed { url } => write!(f, "local feed {url}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Concurrent task bound.
    pub max_active: usize,
    /// Pacing pause between a task resolving and its slot being released.
    pub settle_delay: Duration,
    /// How long a full refresh may run before the run is wrapped up.
    pub refresh_timeout: Duration,
    /// Same, for the smaller personalized-feed run.
    pub my_feed_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_active: DEFAULT_MAX_ACTIVE,
            settle_delay: DEFAULT_SETTLE_DELAY,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            my_feed_timeout: DEFAULT_MY_FEED_TIMEOUT,
        }
    }
}

/// Decides whether an article belongs to the user's personalized aggregate.
pub trait Personalization: Send + Sync {
    fn includes(&self, article: &CachedArticle) -> bool;
}

/// Personalization by followed category ids.
pub struct FollowedCategories {
    categories: HashSet<String>,
}

impl FollowedCategories {
    pub fn new(categories: impl IntoIterator<Item = String>) -> Self {
        Self {
            categories: categories.into_iter().collect(),
        }
    }
}

impl Personalization for FollowedCategories {
    fn includes(&self, article: &CachedArticle) -> bool {
        article
            .category_id
            .as_deref()
            .is_some_and(|category_id| self.categories.contains(category_id))
    }
}

#[derive(Debug, Clone)]
pub enum RefreshEvent {
    /// The tracking index was rewritten; unread badges should be re-read.
    BadgesUpdated,
}

/// Tasks for one orchestration run. Priority tasks are enqueued ahead of the
/// rest, nothing more; the queue stays strictly FIFO.
#[derive(Debug, Clone, Default)]
pub struct RefreshPlan {
    pub priority: Vec<FetchTask>,
    pub rest: Vec<FetchTask>,
}

impl RefreshPlan {
    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.rest.is_empty()
    }

    pub fn len(&self) -> usize {
        self.priority.len() + self.rest.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub scheduled: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// True when the run hit its timeout with tasks still outstanding.
    pub timed_out: bool,
}

#[derive(Default)]
struct RunState {
    queue: VecDeque<FetchTask>,
    active: usize,
    succeeded: usize,
    failed: usize,
}

#[derive(Clone)]
pub struct FetchOrchestrator {
    registry: Arc<SourceRegistry>,
    store: Arc<dyn ArticleStore + Send + Sync>,
    tracking: TrackingIndex,
    personalization: Arc<dyn Personalization>,
    config: OrchestratorConfig,
    state: Arc<Mutex<RunState>>,
    /// Outstanding work: queued plus active. Zero means idle.
    pending: Arc<watch::Sender<usize>>,
    events: broadcast::Sender<RefreshEvent>,
}

impl FetchOrchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<dyn ArticleStore + Send + Sync>,
        tracking: TrackingIndex,
        personalization: Arc<dyn Personalization>,
        config: OrchestratorConfig,
    ) -> Self {
        let (pending, _) = watch::channel(0usize);
        let (events, _) = broadcast::channel(16);
        Self {
            registry,
            store,
            tracking,
            personalization,
            config,
            state: Arc::new(Mutex::new(RunState::default())),
            pending: Arc::new(pending),
            events,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_pending(&self, state: &RunState) {
        self.pending.send_replace(state.queue.len() + state.active);
    }

    /// Queue one task and start it as soon as a slot frees up.
    pub fn enqueue(&self, task: FetchTask) {
        {
            let mut state = self.lock_state();
            state.queue.push_back(task);
            self.publish_pending(&state);
        }
        self.pump();
    }

    /// Full refresh: replaces whatever is queued with the plan's tasks and
    /// waits for the run to drain, up to the refresh timeout. The tracking
    /// index is persisted and a badge event emitted either way.
    pub async fn refresh_all(&self, plan: RefreshPlan) -> RunSummary {
        self.run_plan(plan, self.config.refresh_timeout).await
    }

    /// Personalized-feed refresh; identical shape with the shorter timeout.
    pub async fn refresh_my_feed(&self, plan: RefreshPlan) -> RunSummary {
        self.run_plan(plan, self.config.my_feed_timeout).await
    }

    async fn run_plan(&self, plan: RefreshPlan, timeout: Duration) -> RunSummary {
        let scheduled = {
            let mut state = self.lock_state();
            state.queue.clear();
            state.succeeded = 0;
            state.failed = 0;
            state.queue.extend(plan.priority);
            state.queue.extend(plan.rest);
            let scheduled = state.queue.len();
            self.publish_pending(&state);
            scheduled
        };
        tracing::info!(scheduled, "starting orchestration run");
        self.pump();

        let timed_out = !self.wait_idle(timeout).await;
        if timed_out {
            tracing::warn!(?timeout, "orchestration run timed out, keeping what arrived");
        }

        self.tracking.persist();
        let _ = self.events.send(RefreshEvent::BadgesUpdated);

        let state = self.lock_state();
        let summary = RunSummary {
            scheduled,
            succeeded: state.succeeded,
            failed: state.failed,
            timed_out,
        };
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out,
            "orchestration run finished"
        );
        summary
    }

    /// Wait until no work is queued or active. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.pending.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|&pending| pending == 0)).await;
        matches!(result, Ok(Ok(_)))
    }

    pub fn active_count(&self) -> usize {
        self.lock_state().active
    }

    pub fn pending_count(&self) -> usize {
        *self.pending.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.events.subscribe()
    }

    /// Start queued tasks until the queue is empty or every slot is taken.
    fn pump(&self) {
        loop {
            let task = {
                let mut state = self.lock_state();
                if state.active >= self.config.max_active {
                    return;
                }
                let Some(task) = state.queue.pop_front() else {
                    return;
                };
                state.active += 1;
                self.publish_pending(&state);
                task
            };

            let orchestrator = self.clone();
            tokio::spawn(async move {
                orchestrator.run_task(task).await;
            });
        }
    }

    async fn run_task(&self, task: FetchTask) {
        let result = self.dispatch(&task).await;
        match &result {
            Ok(delivered) => {
                tracing::debug!(task = %task, delivered, "background task finished")
            }
            Err(e) => tracing::warn!(task = %task, error = %e, "background task failed"),
        }

        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }

        {
            let mut state = self.lock_state();
            state.active -= 1;
            match result {
                Ok(_) => state.succeeded += 1,
                Err(_) => state.failed += 1,
            }
            self.publish_pending(&state);
        }
        self.pump();
    }

    async fn dispatch(&self, task: &FetchTask) -> Result<usize> {
        let sink = OrchestratorSink {
            store: self.store.clone(),
            tracking: self.tracking.clone(),
            personalization: self.personalization.clone(),
            delivered: AtomicUsize::new(0),
        };

        match task {
            FetchTask::Category {
                provider,
                category_id,
            } => {
                let fetcher = self
                    .registry
                    .find(provider)
                    .ok_or_else(|| TributaryError::UnknownSource(provider.clone()))?;
                let request = SourceRequest {
                    feed_id: category_id.clone(),
                    category_id: Some(category_id.clone()),
                    url: None,
                    name: None,
                };
                fetcher.fetch(&request, &sink).await?;
            }
            FetchTask::RssFeed {
                url,
                name,
                category_id,
                cache_key,
            } => {
                let feed_id = cache_key.clone().unwrap_or_else(|| rss_cache_key(url));
                let request = SourceRequest {
                    feed_id,
                    category_id: Some(category_id.clone()),
                    url: Some(url.clone()),
                    // An empty name means "use whatever the feed calls itself".
                    name: (!name.is_empty()).then(|| name.clone()),
                };
                self.registry.syndication().fetch(&request, &sink).await?;
            }
            FetchTask::LocalFeed { url } => {
                let request = SourceRequest {
                    feed_id: LOCAL_FEED_ID.to_string(),
                    category_id: None,
                    url: Some(url.clone()),
                    name: None,
                };
                self.registry.syndication().fetch(&request, &sink).await?;
            }
        }

        Ok(sink.delivered.load(Ordering::Relaxed))
    }
}

/// Routes deliveries into the store and the tracking index. Background
/// refreshes are additive: retention, not `clear_items`, governs turnover of
/// the persistent cache.
struct OrchestratorSink {
    store: Arc<dyn ArticleStore + Send + Sync>,
    tracking: TrackingIndex,
    personalization: Arc<dyn Personalization>,
    delivered: AtomicUsize,
}

impl ArticleSink for OrchestratorSink {
    fn set_label(&self, _label: &str) {}

    fn clear_items(&self) {}

    fn add_item(&self, article: CachedArticle) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.store.cache_article(&article);

        if let Some(category_id) = &article.category_id {
            self.tracking.register_category(category_id, &article.url);
        }
        if let Some(source_name) = &article.source_name {
            self.tracking.register_source(source_name, &article.url);
        }

        if self.personalization.includes(&article) {
            self.tracking.register_category(MY_FEED_ID, &article.url);
            let mut personalized = article;
            personalized.feed_id = MY_FEED_ID.to_string();
            self.store.cache_article(&personalized);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{HttpClient, HttpConfig};
    use crate::store::SqliteArticleStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Test provider that synthesizes articles without touching the network.
    struct ScriptedFetcher {
        delay: Duration,
        articles_per_category: usize,
        fail_for: Option<String>,
        calls: Mutex<Vec<String>>,
        gauge: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl ScriptedFetcher {
        fn new(delay: Duration, articles_per_category: usize) -> Self {
            Self {
                delay,
                articles_per_category,
                fail_for: None,
                calls: Mutex::new(Vec::new()),
                gauge: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl crate::source::SourceFetcher for ScriptedFetcher {
        fn provider(&self) -> &str {
            "scripted"
        }

        async fn fetch(
            &self,
            request: &SourceRequest,
            sink: &dyn ArticleSink,
        ) -> crate::app::Result<()> {
            let category_id = request.category_id.clone().unwrap_or_default();
            self.calls.lock().unwrap().push(category_id.clone());

            let running = self.gauge.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.gauge.fetch_sub(1, Ordering::SeqCst);

            if self.fail_for.as_deref() == Some(category_id.as_str()) {
                return Err(TributaryError::Fetch(format!("scripted failure for {category_id}")));
            }

            for i in 0..self.articles_per_category {
                let mut article = CachedArticle::new(
                    format!("https://example.com/{category_id}/{i}"),
                    format!("{category_id} story {i}"),
                    request.feed_id.clone(),
                );
                article.category_id = Some(category_id.clone());
                article.source_name = Some("Scripted".into());
                sink.add_item(article);
            }
            Ok(())
        }
    }

    fn category_task(category_id: &str) -> FetchTask {
        FetchTask::Category {
            provider: "scripted".into(),
            category_id: category_id.into(),
        }
    }

    fn build(
        fetcher: Arc<ScriptedFetcher>,
        followed: Vec<String>,
        config: OrchestratorConfig,
    ) -> (FetchOrchestrator, Arc<SqliteArticleStore>) {
        let mut registry = SourceRegistry::new(HttpClient::new(&HttpConfig::default()));
        registry.register(fetcher);
        let store = Arc::new(SqliteArticleStore::in_memory());
        let orchestrator = FetchOrchestrator::new(
            Arc::new(registry),
            store.clone(),
            TrackingIndex::in_memory(),
            Arc::new(FollowedCategories::new(followed)),
            config,
        );
        (orchestrator, store)
    }

    fn quick_config() -> OrchestratorConfig {
        OrchestratorConfig {
            settle_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_delivers_to_store_and_tracking() {
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::from_millis(5), 2));
        let (orchestrator, store) = build(fetcher, vec!["technology".into()], quick_config());

        let plan = RefreshPlan {
            priority: vec![],
            rest: vec![category_task("technology")],
        };
        let summary = orchestrator.refresh_all(plan).await;

        assert_eq!(summary.scheduled, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);
        assert!(!summary.timed_out);

        assert_eq!(store.article_count("technology"), 2);
        // Followed category, so the articles land in the personalized feed too.
        assert_eq!(store.article_count(MY_FEED_ID), 2);
        assert_eq!(orchestrator.tracking.unread_for_category("technology"), 2);
        assert_eq!(orchestrator.tracking.unread_for_category(MY_FEED_ID), 2);
        assert_eq!(
            orchestrator.tracking.source_counts()["Scripted"].total,
            2
        );
    }

    #[tokio::test]
    async fn test_unfollowed_category_skips_personalized_feed() {
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::from_millis(5), 2));
        let (orchestrator, store) = build(fetcher, vec!["sports".into()], quick_config());

        let plan = RefreshPlan {
            priority: vec![],
            rest: vec![category_task("technology")],
        };
        orchestrator.refresh_all(plan).await;

        assert_eq!(store.article_count("technology"), 2);
        assert_eq!(store.article_count(MY_FEED_ID), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_that_task_only() {
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::from_millis(5), 1));
        let (orchestrator, store) = build(fetcher, vec![], quick_config());

        let plan = RefreshPlan {
            priority: vec![],
            rest: vec![
                FetchTask::Category {
                    provider: "who-knows".into(),
                    category_id: "technology".into(),
                },
                category_task("sports"),
            ],
        };
        let summary = orchestrator.refresh_all(plan).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(store.article_count("sports"), 1);
        assert_eq!(store.article_count("technology"), 0);
    }

    #[tokio::test]
    async fn test_failed_task_contributes_nothing() {
        let mut fetcher = ScriptedFetcher::new(Duration::from_millis(5), 3);
        fetcher.fail_for = Some("technology".into());
        let (orchestrator, store) = build(Arc::new(fetcher), vec![], quick_config());

        let plan = RefreshPlan {
            priority: vec![],
            rest: vec![category_task("technology")],
        };
        let summary = orchestrator.refresh_all(plan).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(store.article_count("technology"), 0);
    }

    #[tokio::test]
    async fn test_active_never_exceeds_bound() {
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::from_millis(100), 1));
        let peak = fetcher.peak.clone();
        let (orchestrator, _store) = build(fetcher, vec![], quick_config());

        let plan = RefreshPlan {
            priority: vec![],
            rest: ["a", "b", "c", "d", "e"]
                .iter()
                .map(|id| category_task(id))
                .collect(),
        };
        let summary = orchestrator.refresh_all(plan).await;

        assert_eq!(summary.succeeded, 5);
        assert!(!summary.timed_out);
        assert!(peak.load(Ordering::SeqCst) <= DEFAULT_MAX_ACTIVE);
        assert_eq!(orchestrator.active_count(), 0);
        assert_eq!(orchestrator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_priority_tasks_run_first() {
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::from_millis(5), 0));
        let (orchestrator, _store) = build(
            fetcher.clone(),
            vec![],
            OrchestratorConfig {
                max_active: 1,
                settle_delay: Duration::from_millis(1),
                ..Default::default()
            },
        );

        let plan = RefreshPlan {
            priority: vec![category_task("front")],
            rest: vec![category_task("second"), category_task("third")],
        };
        orchestrator.refresh_all(plan).await;

        let calls = fetcher.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["front", "second", "third"]);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_and_run_still_wraps_up() {
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::from_millis(500), 1));
        let (orchestrator, _store) = build(
            fetcher,
            vec![],
            OrchestratorConfig {
                refresh_timeout: Duration::from_millis(50),
                settle_delay: Duration::ZERO,
                ..Default::default()
            },
        );

        let mut events = orchestrator.subscribe();
        let plan = RefreshPlan {
            priority: vec![],
            rest: vec![category_task("slow")],
        };
        let summary = orchestrator.refresh_all(plan).await;

        assert!(summary.timed_out);
        assert_eq!(summary.succeeded, 0);
        // The badge event still fires when a run times out.
        assert!(matches!(events.try_recv(), Ok(RefreshEvent::BadgesUpdated)));
    }

    #[tokio::test]
    async fn test_empty_plan_completes_immediately() {
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::from_millis(5), 1));
        let (orchestrator, _store) = build(fetcher, vec![], quick_config());

        let summary = orchestrator.refresh_all(RefreshPlan::default()).await;

        assert_eq!(summary.scheduled, 0);
        assert_eq!(summary.succeeded, 0);
        assert!(!summary.timed_out);
    }

    #[tokio::test]
    async fn test_enqueue_outside_a_run_is_worked_off() {
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::from_millis(5), 1));
        let (orchestrator, store) = build(fetcher, vec![], quick_config());

        orchestrator.enqueue(category_task("technology"));
        assert!(orchestrator.wait_idle(Duration::from_secs(2)).await);

        assert_eq!(store.article_count("technology"), 1);
    }

    #[tokio::test]
    async fn test_wait_idle_times_out_while_work_is_active() {
        let fetcher = Arc::new(ScriptedFetcher::new(Duration::from_millis(300), 1));
        let (orchestrator, _store) = build(fetcher, vec![], quick_config());

        orchestrator.enqueue(category_task("technology"));
        assert!(!orchestrator.wait_idle(Duration::from_millis(20)).await);
        assert!(orchestrator.wait_idle(Duration::from_secs(2)).await);
    }
}

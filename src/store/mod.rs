pub mod sqlite;

pub use sqlite::SqliteArticleStore;

use crate::domain::CachedArticle;

/// Offline article cache.
///
/// The boundary is infallible: persistence failures are logged by the
/// implementation and surface as `false`, empty results, or silent no-ops,
/// never as errors the consumer has to handle.
pub trait ArticleStore {
    /// Insert or refresh one article under its `(url, feed_id)` key.
    /// Returns false when the article is rejected or the write fails.
    fn cache_article(&self, article: &CachedArticle) -> bool;

    /// Most recently cached articles for a feed, newest first.
    fn articles(&self, feed_id: &str, limit: Option<usize>) -> Vec<CachedArticle>;

    fn article_count(&self, feed_id: &str) -> usize;

    /// Enforce the retention tiers and reclaim disk space.
    fn cleanup(&self);

    fn clear_feed(&self, feed_id: &str);

    fn clear_all(&self);
}

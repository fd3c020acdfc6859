use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Synthetic feed id for the aggregated frontpage tier. Rows cached under it
/// get the short retention window.
pub const FRONTPAGE_FEED_ID: &str = "frontpage";

/// Feed id for the personalized aggregate built from followed categories.
pub const MY_FEED_ID: &str = "myFeed";

/// Feed id for the user's own local feed URL, when one is configured.
pub const LOCAL_FEED_ID: &str = "localFeed";

/// Article metadata as cached for offline display. Uniqueness is on
/// `(url, feed_id)`; the same story cached under two feeds is two rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedArticle {
    pub url: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub feed_id: String,
    /// Epoch seconds of the last upsert. Assigned by the store; zero until
    /// the article has been cached once.
    pub cached_at: i64,
    pub source_name: Option<String>,
    pub logo_url: Option<String>,
    pub category_id: Option<String>,
}

impl CachedArticle {
    pub fn new(url: String, title: String, feed_id: String) -> Self {
        Self {
            url,
            title,
            thumbnail_url: None,
            published_at: None,
            feed_id,
            cached_at: 0,
            source_name: None,
            logo_url: None,
            category_id: None,
        }
    }

    pub fn display_source(&self) -> &str {
        self.source_name.as_deref().unwrap_or("(unknown source)")
    }
}

/// Derive a stable cache key for an RSS subscription without an explicit one.
/// The `rss-` prefix keeps derived keys out of the provider category id space.
pub fn rss_cache_key(feed_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feed_url.as_bytes());
    format!("rss-{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rss_cache_key_deterministic() {
        let k1 = rss_cache_key("https://example.com/feed.xml");
        let k2 = rss_cache_key("https://example.com/feed.xml");
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_rss_cache_key_distinct_urls() {
        let k1 = rss_cache_key("https://example.com/feed.xml");
        let k2 = rss_cache_key("https://other.com/feed.xml");
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_rss_cache_key_shape() {
        let key = rss_cache_key("https://example.com/feed.xml");
        let hex_part = key.strip_prefix("rss-").unwrap();
        assert_eq!(hex_part.len(), 64); // SHA256 produces 32 bytes = 64 hex chars
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_new_article_has_no_cache_stamp() {
        let article = CachedArticle::new(
            "https://example.com/story".into(),
            "A story".into(),
            FRONTPAGE_FEED_ID.into(),
        );
        assert_eq!(article.cached_at, 0);
        assert_eq!(article.feed_id, "frontpage");
    }

    #[test]
    fn test_display_source_fallback() {
        let mut article = CachedArticle::new(
            "https://example.com/story".into(),
            "A story".into(),
            "technology".into(),
        );
        assert_eq!(article.display_source(), "(unknown source)");
        article.source_name = Some("Example Wire".into());
        assert_eq!(article.display_source(), "Example Wire");
    }
}

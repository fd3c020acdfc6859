pub mod article;

pub use article::{rss_cache_key, CachedArticle, FRONTPAGE_FEED_ID, LOCAL_FEED_ID, MY_FEED_ID};

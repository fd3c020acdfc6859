use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rusqlite_migration::{Migrations, M};

use crate::app::{Result, TributaryError};
use crate::domain::{CachedArticle, FRONTPAGE_FEED_ID};
use crate::store::ArticleStore;

/// The frontpage tier turns over quickly; everything else keeps a month of
/// history.
const FRONTPAGE_ROW_CAP: usize = 120;
const FRONTPAGE_MAX_AGE_SECS: i64 = 48 * 60 * 60;
const FEED_ROW_CAP: usize = 200;
const FEED_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

/// SQLite-backed [`ArticleStore`]. A store that fails to open or migrate is
/// permanently degraded: every operation becomes a logged no-op, so a broken
/// database file costs cached articles but never the session.
pub struct SqliteArticleStore {
    conn: Option<Mutex<Connection>>,
}

impl SqliteArticleStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::try_open(path) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "article store unavailable, running degraded");
                Self { conn: None }
            }
        }
    }

    pub fn in_memory() -> Self {
        let opened = Connection::open_in_memory()
            .map_err(TributaryError::from)
            .and_then(Self::from_connection);
        match opened {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(error = %e, "article store unavailable, running degraded");
                Self { conn: None }
            }
        }
    }

    fn try_open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);
        migrations
            .to_latest(&mut conn)
            .map_err(|e| TributaryError::Other(format!("migration failed: {e}")))?;

        Ok(Self {
            conn: Some(Mutex::new(conn)),
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.conn.is_none()
    }

    fn lock(&self) -> Option<MutexGuard<'_, Connection>> {
        self.conn
            .as_ref()
            .map(|conn| conn.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Run one statement batch against the connection, swallowing failures
    /// into `default`. The degraded store short-circuits here.
    fn with_conn<T>(
        &self,
        operation: &str,
        default: T,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> T {
        let Some(conn) = self.lock() else {
            return default;
        };
        match f(&conn) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(operation, error = %e, "article store operation failed");
                default
            }
        }
    }

    fn upsert(&self, article: &CachedArticle, cached_at: i64) -> bool {
        self.with_conn("cache_article", false, |conn| {
            let changed = conn.execute(
                "INSERT INTO cached_articles
                     (url, title, thumbnail_url, published_at, feed_id, cached_at,
                      source_name, logo_url, category_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(url, feed_id) DO UPDATE SET
                     title = excluded.title,
                     thumbnail_url = excluded.thumbnail_url,
                     published_at = excluded.published_at,
                     cached_at = excluded.cached_at,
                     source_name = excluded.source_name,
                     logo_url = excluded.logo_url,
                     category_id = excluded.category_id",
                params![
                    article.url,
                    article.title,
                    article.thumbnail_url,
                    article.published_at.map(|dt| dt.to_rfc3339()),
                    article.feed_id,
                    cached_at,
                    article.source_name,
                    article.logo_url,
                    article.category_id
                ],
            )?;
            Ok(changed > 0)
        })
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }
}

impl ArticleStore for SqliteArticleStore {
    fn cache_article(&self, article: &CachedArticle) -> bool {
        if article.url.is_empty() || article.title.is_empty() || article.feed_id.is_empty() {
            tracing::debug!(url = %article.url, feed_id = %article.feed_id, "rejecting article with blank key fields");
            return false;
        }
        self.upsert(article, Utc::now().timestamp())
    }

    fn articles(&self, feed_id: &str, limit: Option<usize>) -> Vec<CachedArticle> {
        self.with_conn("articles", Vec::new(), |conn| {
            let mut stmt = conn.prepare(
                "SELECT url, title, thumbnail_url, published_at, feed_id, cached_at,
                        source_name, logo_url, category_id
                 FROM cached_articles WHERE feed_id = ?1
                 ORDER BY cached_at DESC, published_at DESC
                 LIMIT ?2",
            )?;

            let articles = stmt
                .query_map(
                    params![feed_id, limit.map(|l| l as i64).unwrap_or(-1)],
                    |row| {
                        Ok(CachedArticle {
                            url: row.get(0)?,
                            title: row.get(1)?,
                            thumbnail_url: row.get(2)?,
                            published_at: row
                                .get::<_, Option<String>>(3)?
                                .and_then(|s| Self::parse_datetime(&s)),
                            feed_id: row.get(4)?,
                            cached_at: row.get(5)?,
                            source_name: row.get(6)?,
                            logo_url: row.get(7)?,
                            category_id: row.get(8)?,
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(articles)
        })
    }

    fn article_count(&self, feed_id: &str) -> usize {
        self.with_conn("article_count", 0, |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM cached_articles WHERE feed_id = ?1",
                params![feed_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    fn cleanup(&self) {
        if self.is_degraded() {
            return;
        }

        let now = Utc::now().timestamp();
        let removed = self.with_conn("cleanup", 0, |conn| {
            // Phase one: tier-specific age cutoffs.
            let mut removed = conn.execute(
                "DELETE FROM cached_articles WHERE feed_id = ?1 AND cached_at < ?2",
                params![FRONTPAGE_FEED_ID, now - FRONTPAGE_MAX_AGE_SECS],
            )?;
            removed += conn.execute(
                "DELETE FROM cached_articles WHERE feed_id != ?1 AND cached_at < ?2",
                params![FRONTPAGE_FEED_ID, now - FEED_MAX_AGE_SECS],
            )?;

            // Phase two: per-feed row caps, keeping the most recent rows.
            let feed_ids: Vec<String> = conn
                .prepare("SELECT DISTINCT feed_id FROM cached_articles")?
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for feed_id in feed_ids {
                let cap = if feed_id == FRONTPAGE_FEED_ID {
                    FRONTPAGE_ROW_CAP
                } else {
                    FEED_ROW_CAP
                };
                removed += conn.execute(
                    "DELETE FROM cached_articles
                     WHERE feed_id = ?1 AND url IN (
                         SELECT url FROM cached_articles WHERE feed_id = ?1
                         ORDER BY cached_at DESC, published_at DESC
                         LIMIT -1 OFFSET ?2
                     )",
                    params![feed_id, cap as i64],
                )?;
            }

            conn.execute("VACUUM", [])?;
            Ok(removed)
        });

        tracing::info!(removed, "article store cleanup finished");
    }

    fn clear_feed(&self, feed_id: &str) {
        let removed = self.with_conn("clear_feed", 0, |conn| {
            let removed = conn.execute(
                "DELETE FROM cached_articles WHERE feed_id = ?1",
                params![feed_id],
            )?;
            conn.execute("VACUUM", [])?;
            Ok(removed)
        });
        tracing::debug!(feed_id, removed, "cleared cached articles for feed");
    }

    fn clear_all(&self) {
        let removed = self.with_conn("clear_all", 0, |conn| {
            let removed = conn.execute("DELETE FROM cached_articles", [])?;
            conn.execute("VACUUM", [])?;
            Ok(removed)
        });
        tracing::info!(removed, "cleared all cached articles");
    }
}

use async_trait::async_trait;
use chrono::Utc;
use feed_rs::parser;
use html_escape::decode_html_entities;

use crate::app::{Result, TributaryError};
use crate::client::{FetchOptions, HttpClient};
use crate::domain::CachedArticle;
use crate::source::{ArticleSink, SourceFetcher, SourceRequest};

pub const RSS_PROVIDER: &str = "rss";

/// Syndication fetcher: downloads one RSS/Atom feed and delivers its entries
/// as article metadata. Entries without a link or a title are skipped.
pub struct RssFetcher {
    client: HttpClient,
}

impl RssFetcher {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceFetcher for RssFetcher {
    fn provider(&self) -> &str {
        RSS_PROVIDER
    }

    async fn fetch(&self, request: &SourceRequest, sink: &dyn ArticleSink) -> Result<()> {
        let url = request
            .url
            .as_deref()
            .ok_or_else(|| TributaryError::Fetch("syndication fetch needs a feed url".into()))?;

        let response = self.client.fetch(url, &FetchOptions::default()).await;
        if response.status == 0 {
            let message = response
                .error
                .clone()
                .unwrap_or_else(|| "network failure".into());
            return Err(TributaryError::Fetch(format!("{url}: {message}")));
        }
        if !response.is_success() {
            return Err(TributaryError::Fetch(format!(
                "{url} returned HTTP {}",
                response.status
            )));
        }

        let feed = parser::parse(response.body.as_ref())
            .map_err(|e| TributaryError::FeedParse(e.to_string()))?;

        let source_name = request.name.clone().or_else(|| {
            feed.title
                .as_ref()
                .map(|t| decode_html_entities(&t.content).to_string())
        });
        if let Some(label) = &source_name {
            sink.set_label(label);
        }
        let logo_url = feed
            .logo
            .as_ref()
            .map(|l| l.uri.clone())
            .or_else(|| feed.icon.as_ref().map(|i| i.uri.clone()));

        // The parse succeeded, so whatever was delivered before is stale.
        sink.clear_items();

        let mut delivered = 0usize;
        for entry in feed.entries {
            let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
                continue;
            };
            let Some(title) = entry
                .title
                .as_ref()
                .map(|t| decode_html_entities(&t.content).to_string())
                .filter(|t| !t.is_empty())
            else {
                continue;
            };

            let mut article = CachedArticle::new(link, title, request.feed_id.clone());
            article.published_at = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc));
            article.thumbnail_url = entry
                .media
                .first()
                .and_then(|m| m.thumbnails.first().map(|t| t.image.uri.clone()));
            article.source_name = source_name.clone();
            article.logo_url = logo_url.clone();
            article.category_id = request.category_id.clone();

            sink.add_item(article);
            delivered += 1;
        }

        tracing::debug!(%url, delivered, "syndication fetch complete");
        Ok(())
    }
}

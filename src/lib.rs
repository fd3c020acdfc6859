//! # Tributary
//!
//! An offline-first news aggregation core: background refresh, shared HTTP
//! fetching, persistent article caching, and unread tracking.
//!
//! ## Architecture
//!
//! ```text
//! Sources → Orchestrator → Store + Tracking
//!     ↘ Foreground loads ↗
//! ```
//!
//! - [`client`]: throttled HTTP client that collapses identical in-flight
//!   requests into one network call
//! - [`source`]: pluggable fetchers that turn feeds and category listings
//!   into article metadata
//! - [`orchestrator`]: bounded background refresh queue with completion
//!   signaling
//! - [`store`]: SQLite article cache with tiered retention
//! - [`tracking`]: unread/viewed bookkeeping behind badge counts
//!
//! ## Quick Start
//!
//! ```bash
//! # Refresh everything configured
//! tributary refresh
//!
//! # What's cached on the front page?
//! tributary articles
//!
//! # Unread badges
//! tributary counts
//!
//! # Load one feed right now
//! tributary show --url https://blog.rust-lang.org/feed.xml
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// client, store, tracking, sources, orchestrator.
pub mod app;

/// In-memory LRU cache with eviction callbacks.
pub mod cache;

/// Generation-counter cancellation for user-visible loads.
pub mod cancel;

/// Throttled, deduplicating HTTP client.
///
/// - [`HttpClient`](client::HttpClient): reqwest-based client behind a
///   semaphore
/// - [`FetchOptions`](client::FetchOptions): per-request knobs, including
///   opting out of request sharing
pub mod client;

/// Command-line interface using clap.
///
/// - `refresh` - Background-refresh everything configured
/// - `myfeed` - Refresh the personalized feed
/// - `articles [feed_id]` - List cached articles
/// - `counts` - Unread badge counts
/// - `show --url/--category` - Foreground load
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/tributary/config.toml`: HTTP limits, retention
/// paths, orchestrator pacing, followed categories, and the feed catalog.
pub mod config;

/// Core domain models.
///
/// - [`CachedArticle`](domain::CachedArticle): one cached article summary
/// - Well-known feed ids and the derived per-feed cache key
pub mod domain;

/// Foreground feed loading with explicit cancellation.
pub mod foreground;

/// Background fetch orchestration.
///
/// - [`FetchOrchestrator`](orchestrator::FetchOrchestrator): FIFO queue,
///   bounded concurrency, genuine completion signaling
/// - [`FetchTask`](orchestrator::FetchTask): category, feed, and personal
///   feed work items
pub mod orchestrator;

/// Pluggable article sources.
///
/// - [`SourceFetcher`](source::SourceFetcher): async trait each provider
///   implements
/// - [`RssFetcher`](source::RssFetcher): RSS/Atom via feed-rs
/// - [`CatalogSource`](source::CatalogSource): category listings backed by
///   a configured feed catalog
pub mod source;

/// SQLite persistence layer.
///
/// - [`ArticleStore`](store::ArticleStore): trait defining cache operations
/// - [`SqliteArticleStore`](store::SqliteArticleStore): SQLite
///   implementation with tiered retention
pub mod store;

/// Unread/viewed tracking behind badge counts.
pub mod tracking;

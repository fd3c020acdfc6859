pub mod commands;

use clap::{Parser, Subcommand};

use crate::domain::FRONTPAGE_FEED_ID;

#[derive(Parser)]
#[command(name = "tributary")]
#[command(about = "News aggregation core: background refresh, caching, unread tracking", long_about = None)]
pub struct Cli {
    /// Path to the config file (default: ~/.config/tributary/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Refresh the front page, every category, and every configured feed
    Refresh,
    /// Refresh only the personalized feed
    Myfeed,
    /// List cached articles for a feed
    Articles {
        /// Feed id to list (a category id, "frontpage", "myFeed", ...)
        #[arg(default_value = FRONTPAGE_FEED_ID)]
        feed_id: String,

        /// Maximum number of articles to print
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show unread/total counts per category and per source
    Counts,
    /// Load one feed or category in the foreground and print it
    Show {
        /// Feed URL to load
        #[arg(long, conflicts_with = "category")]
        url: Option<String>,

        /// Category id to load through its provider
        #[arg(long)]
        category: Option<String>,
    },
    /// Mark an article as viewed
    Read {
        /// Article URL
        url: String,
    },
    /// Fetch an image into the media cache
    Media {
        /// Image URL
        url: String,
    },
    /// Delete stale cached articles and compact the database
    Cleanup,
    /// Clear cached articles, and tracking state with them
    Clear {
        /// Only clear this feed id, leaving tracking state alone
        #[arg(long)]
        feed_id: Option<String>,
    },
}

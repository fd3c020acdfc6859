//! Configuration management.
//!
//! Configuration is read from `~/.config/tributary/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::HttpConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::source::FeedEndpoint;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpSection,
    pub store: StoreSection,
    pub media: MediaSection,
    pub orchestrator: OrchestratorSection,
    pub my_feed: MyFeedSection,
    pub sources: SourcesSection,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, creating a commented
    /// default file there when none exists yet.
    pub fn load_from(config_path: &PathBuf) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.clone(),
            source: e,
        })?;

        Ok(config)
    }

    /// Get the default config file path: `~/.config/tributary/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("tributary").join("config.toml"))
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let default_config = Self::default_config_content();

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;

        file.write_all(default_config.as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# Tributary Configuration

[http]
# Maximum simultaneous network requests
max_concurrent_requests = 10

# Per-request timeout in seconds
timeout_secs = 10

# Window (seconds) during which identical requests share one response
dedup_window_secs = 5

# In-flight request table size that triggers trimming
dedup_capacity = 100

# Uncomment to override the User-Agent header
# user_agent = "tributary/0.1.0"

[store]
# Uncomment to override the article database location
# path = "/path/to/articles.sqlite"

[media]
# Number of decoded thumbnails/logos kept in memory
cache_capacity = 50

[orchestrator]
# Concurrent background fetch tasks
max_active = 3

# Pause (milliseconds) after a task resolves before its slot frees up
settle_delay_ms = 100

# Upper bound (seconds) on a full background refresh
refresh_timeout_secs = 10

# Upper bound (seconds) on a personalized-feed refresh
my_feed_timeout_secs = 3

[my_feed]
# Categories whose articles also land in the personalized feed
followed_categories = ["technology"]

# Uncomment to refresh a personal feed alongside the followed categories
# local_feed_url = "https://example.com/my.xml"

# Feeds grouped by category. The front page aggregates all of them.
[[sources.feeds]]
category = "technology"
url = "https://feeds.arstechnica.com/arstechnica/technology-lab"
name = "Ars Technica"

[[sources.feeds]]
category = "technology"
url = "https://www.theverge.com/rss/index.xml"
name = "The Verge"

[[sources.feeds]]
category = "world"
url = "https://feeds.bbci.co.uk/news/world/rss.xml"
name = "BBC World"
"##
        .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Maximum simultaneous network requests (default: 10)
    pub max_concurrent_requests: usize,

    /// Per-request timeout in seconds (default: 10)
    pub timeout_secs: u64,

    /// Seconds during which identical in-flight/completed requests are shared (default: 5)
    pub dedup_window_secs: u64,

    /// In-flight table size that triggers trimming (default: 100)
    pub dedup_capacity: usize,

    /// User agent string to use
    pub user_agent: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            timeout_secs: 10,
            dedup_window_secs: 5,
            dedup_capacity: 100,
            user_agent: None,
        }
    }
}

impl HttpSection {
    /// Get the per-request timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the request-sharing window as a Duration
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn to_http_config(&self) -> HttpConfig {
        let defaults = HttpConfig::default();
        HttpConfig {
            max_concurrent: self.max_concurrent_requests,
            timeout: self.timeout(),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            dedup_ttl: self.dedup_window(),
            dedup_capacity: self.dedup_capacity,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Article database location; defaults to the platform cache directory
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaSection {
    /// Number of media entries kept in memory (default: 50)
    pub cache_capacity: usize,
}

impl Default for MediaSection {
    fn default() -> Self {
        Self { cache_capacity: 50 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// Concurrent background fetch tasks (default: 3)
    pub max_active: usize,

    /// Pause after a task resolves before its slot frees up, in milliseconds (default: 100)
    pub settle_delay_ms: u64,

    /// Upper bound on a full background refresh in seconds (default: 10)
    pub refresh_timeout_secs: u64,

    /// Upper bound on a personalized-feed refresh in seconds (default: 3)
    pub my_feed_timeout_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_active: 3,
            settle_delay_ms: 100,
            refresh_timeout_secs: 10,
            my_feed_timeout_secs: 3,
        }
    }
}

impl OrchestratorSection {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn my_feed_timeout(&self) -> Duration {
        Duration::from_secs(self.my_feed_timeout_secs)
    }

    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_active: self.max_active,
            settle_delay: self.settle_delay(),
            refresh_timeout: self.refresh_timeout(),
            my_feed_timeout: self.my_feed_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MyFeedSection {
    /// Categories whose articles also land in the personalized feed
    pub followed_categories: Vec<String>,

    /// Optional personal feed URL, refreshed alongside followed categories
    pub local_feed_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesSection {
    pub feeds: Vec<FeedEntry>,
}

/// One configured feed, assigned to a category.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedEntry {
    pub category: String,
    pub url: String,
    pub name: Option<String>,
}

impl Default for SourcesSection {
    fn default() -> Self {
        Self {
            feeds: vec![
                FeedEntry {
                    category: "technology".to_string(),
                    url: "https://feeds.arstechnica.com/arstechnica/technology-lab".to_string(),
                    name: Some("Ars Technica".to_string()),
                },
                FeedEntry {
                    category: "technology".to_string(),
                    url: "https://www.theverge.com/rss/index.xml".to_string(),
                    name: Some("The Verge".to_string()),
                },
                FeedEntry {
                    category: "world".to_string(),
                    url: "https://feeds.bbci.co.uk/news/world/rss.xml".to_string(),
                    name: Some("BBC World".to_string()),
                },
            ],
        }
    }
}

impl SourcesSection {
    /// Group the configured feeds by category, preserving file order.
    pub fn by_category(&self) -> HashMap<String, Vec<FeedEndpoint>> {
        let mut categories: HashMap<String, Vec<FeedEndpoint>> = HashMap::new();
        for entry in &self.feeds {
            categories
                .entry(entry.category.clone())
                .or_default()
                .push(FeedEndpoint {
                    url: entry.url.clone(),
                    name: entry.name.clone(),
                });
        }
        categories
    }

    /// Every endpoint regardless of category, for front-page aggregation.
    pub fn all_endpoints(&self) -> Vec<FeedEndpoint> {
        self.feeds
            .iter()
            .map(|entry| FeedEndpoint {
                url: entry.url.clone(),
                name: entry.name.clone(),
            })
            .collect()
    }

    pub fn category_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for entry in &self.feeds {
            if !ids.contains(&entry.category) {
                ids.push(entry.category.clone());
            }
        }
        ids
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

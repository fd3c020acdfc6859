//! Unread tracking index.
//!
//! Maps category ids and source names to the set of article URLs ever
//! delivered under them, plus the set of URLs the user has viewed. The unread
//! count for a key is registered minus viewed. The whole index lives in
//! memory and is persisted as a JSON flat file at the end of each
//! orchestration run; a missing or corrupt file just means starting empty.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrackingData {
    pub by_category: HashMap<String, HashSet<String>>,
    pub by_source: HashMap<String, HashSet<String>>,
    pub viewed: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadCount {
    pub unread: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct TrackingIndex {
    inner: Arc<RwLock<TrackingData>>,
    path: Option<PathBuf>,
}

impl TrackingIndex {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(TrackingData::default())),
            path: None,
        }
    }

    /// Load the index from `path`, falling back to an empty one when the
    /// file is missing or unreadable.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<TrackingData>(&bytes) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "tracking index corrupt, starting empty");
                    TrackingData::default()
                }
            },
            Err(_) => TrackingData::default(),
        };
        Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TrackingData> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TrackingData> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `url` as delivered under a category. Idempotent.
    pub fn register_category(&self, category_id: &str, url: &str) {
        let url = normalize_url(url);
        self.write()
            .by_category
            .entry(category_id.to_string())
            .or_default()
            .insert(url);
    }

    /// Record `url` as delivered by a source. Idempotent.
    pub fn register_source(&self, source_name: &str, url: &str) {
        let url = normalize_url(url);
        self.write()
            .by_source
            .entry(source_name.to_string())
            .or_default()
            .insert(url);
    }

    /// Mark one article URL as viewed, in every bucket it appears in.
    pub fn mark_viewed(&self, url: &str) {
        self.write().viewed.insert(normalize_url(url));
    }

    pub fn unread_for_category(&self, category_id: &str) -> usize {
        let data = self.read();
        match data.by_category.get(category_id) {
            Some(urls) => urls.iter().filter(|url| !data.viewed.contains(*url)).count(),
            None => 0,
        }
    }

    pub fn category_counts(&self) -> BTreeMap<String, UnreadCount> {
        let data = self.read();
        Self::counts(&data.by_category, &data.viewed)
    }

    pub fn source_counts(&self) -> BTreeMap<String, UnreadCount> {
        let data = self.read();
        Self::counts(&data.by_source, &data.viewed)
    }

    fn counts(
        buckets: &HashMap<String, HashSet<String>>,
        viewed: &HashSet<String>,
    ) -> BTreeMap<String, UnreadCount> {
        buckets
            .iter()
            .map(|(key, urls)| {
                let unread = urls.iter().filter(|url| !viewed.contains(*url)).count();
                (
                    key.clone(),
                    UnreadCount {
                        unread,
                        total: urls.len(),
                    },
                )
            })
            .collect()
    }

    /// Drop everything, including the persisted file's contents on the next
    /// [`TrackingIndex::persist`].
    pub fn clear(&self) {
        *self.write() = TrackingData::default();
    }

    /// Write the index to its flat file. Failures are logged, not returned;
    /// an in-memory index skips this silently.
    pub fn persist(&self) {
        let Some(path) = &self.path else {
            tracing::debug!("tracking index is in-memory only, skipping persist");
            return;
        };
        let bytes = {
            let data = self.read();
            serde_json::to_vec_pretty(&*data).expect("serialize tracking data")
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, bytes) {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist tracking index");
        }
    }
}

/// Two URLs differing only in fragment are the same article.
fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

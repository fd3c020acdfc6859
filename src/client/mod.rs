//! Deduplicating, concurrency-throttled HTTP client.
//!
//! All outbound requests go through [`HttpClient`]. Concurrent fetches of the
//! same URL share one network call, completed responses are replayed for a
//! short freshness window, and a global semaphore bounds how many real calls
//! run at once. Transport failures are part of the [`Response`] value and
//! never propagate as errors.

pub mod http;
mod inflight;

pub use http::{HttpClient, HttpConfig};
pub use reqwest::Method;

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status, or 0 when the transport failed before a status line.
    pub status: u16,
    pub body: Bytes,
    pub headers: HashMap<String, String>,
    /// Present exactly when `status == 0`.
    pub error: Option<String>,
}

impl Response {
    pub(crate) fn failure(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: Bytes::new(),
            headers: HashMap::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    /// Overrides the client-level user agent for this request.
    pub user_agent: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Overrides the client-level timeout for this request.
    pub timeout: Option<Duration>,
    /// Coalesce with an in-flight request for the same URL.
    pub dedup: bool,
    /// Replay a completed response within the freshness window, and leave
    /// this request's own response behind for later callers.
    pub cache: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            user_agent: None,
            headers: Vec::new(),
            timeout: None,
            dedup: true,
            cache: true,
        }
    }
}

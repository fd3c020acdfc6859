use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use tokio::sync::{mpsc, Semaphore};

use super::inflight::{Claim, InflightTable};
use super::{FetchOptions, Response};

pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(5);
pub const DEFAULT_DEDUP_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Upper bound on simultaneous real network calls.
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub user_agent: String,
    /// Freshness window during which a completed response is replayed.
    pub dedup_ttl: Duration,
    /// Request table size that triggers the half-clear.
    pub dedup_capacity: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout: DEFAULT_TIMEOUT,
            user_agent: "tributary/0.1.0".into(),
            dedup_ttl: DEFAULT_DEDUP_TTL,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

type FetchCallback = Box<dyn FnOnce(Arc<Response>) + Send + 'static>;

struct DeliveryJob {
    callback: FetchCallback,
    response: Arc<Response>,
}

#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    throttle: Arc<Semaphore>,
    inflight: Arc<InflightTable>,
    delivery: mpsc::UnboundedSender<DeliveryJob>,
}

impl HttpClient {
    /// Must be called from within a tokio runtime; the callback delivery
    /// task is spawned here.
    pub fn new(config: &HttpConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(config.user_agent.clone())
            .build()
            .expect("Failed to build HTTP client");

        let (delivery, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::deliver(rx));

        Self {
            http,
            throttle: Arc::new(Semaphore::new(config.max_concurrent)),
            inflight: Arc::new(InflightTable::new(config.dedup_ttl, config.dedup_capacity)),
            delivery,
        }
    }

    /// Single consumer for background-fetch callbacks. Running them all on
    /// one task keeps downstream state mutation sequential.
    async fn deliver(mut rx: mpsc::UnboundedReceiver<DeliveryJob>) {
        while let Some(job) = rx.recv().await {
            (job.callback)(job.response);
        }
    }

    /// Fetch `url`, coalescing with any in-flight request for the same URL
    /// and replaying recently completed responses. Never errors: transport
    /// failures come back as a [`Response`] with status 0 and a message.
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Arc<Response> {
        if !options.dedup {
            return self.execute_throttled(url, options).await;
        }

        loop {
            match self.inflight.claim(url, options.cache) {
                Claim::Fresh(response) => {
                    tracing::debug!(%url, "serving fetch from freshness window");
                    return response;
                }
                Claim::Owner { id, tx } => {
                    let response = self.execute_throttled(url, options).await;
                    self.inflight
                        .complete(url, id, tx, response.clone(), options.cache);
                    return response;
                }
                Claim::Wait { id, mut rx } => {
                    match rx.wait_for(|slot| slot.is_some()).await {
                        Ok(slot) => {
                            if let Some(response) = slot.as_ref().cloned() {
                                tracing::debug!(%url, "coalesced onto in-flight fetch");
                                return response;
                            }
                        }
                        Err(_) => {
                            // The owner went away without publishing;
                            // reclaim the slot on the next pass.
                            self.inflight.forget_abandoned(url, id);
                        }
                    }
                }
            }
        }
    }

    /// Spawn `fetch` onto the runtime; `callback` runs on the shared
    /// delivery task once the response is in.
    pub fn fetch_background<F>(&self, url: &str, options: FetchOptions, callback: F)
    where
        F: FnOnce(Arc<Response>) + Send + 'static,
    {
        let client = self.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            let response = client.fetch(&url, &options).await;
            let job = DeliveryJob {
                callback: Box::new(callback),
                response,
            };
            if client.delivery.send(job).is_err() {
                tracing::debug!(%url, "delivery task gone, dropping fetch callback");
            }
        });
    }

    /// Duplicate-free callers get here; the permit is held for the duration
    /// of the real network call only.
    async fn execute_throttled(&self, url: &str, options: &FetchOptions) -> Arc<Response> {
        let _permit = self.throttle.acquire().await.expect("Semaphore closed");
        Arc::new(self.execute(url, options).await)
    }

    async fn execute(&self, url: &str, options: &FetchOptions) -> Response {
        tracing::debug!(%url, method = %options.method, "performing network call");

        let mut extra = HeaderMap::new();
        for (name, value) in &options.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                extra.insert(name, value);
            }
        }
        if let Some(user_agent) = &options.user_agent {
            if let Ok(value) = HeaderValue::from_str(user_agent) {
                extra.insert(USER_AGENT, value);
            }
        }

        let mut request = self
            .http
            .request(options.method.clone(), url)
            .headers(extra);
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%url, error = %e, "fetch failed");
                return Response::failure(e.to_string());
            }
        };

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        match response.bytes().await {
            Ok(body) => Response {
                status,
                body,
                headers,
                error: None,
            },
            Err(e) => {
                tracing::warn!(%url, error = %e, "failed to read response body");
                Response::failure(e.to_string())
            }
        }
    }
}

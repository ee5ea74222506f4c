//! Bridge from the older backend client into the loader interface

use crate::dataloader::{cache_key, RequestCache};
use crate::error::FetchError;
use crate::fetch::{query_pairs, ApiResponse, Params, DEFAULT_TIMEOUT};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// The older client: plain GETs returning a JSON body, no request-id
/// propagation and no header access.
#[async_trait]
pub trait LegacyClient: Send + Sync {
    async fn get(&self, path: &str, params: &Params) -> Result<Value, FetchError>;
}

/// reqwest implementation of [`LegacyClient`]
#[derive(Clone)]
pub struct HttpLegacyClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpLegacyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LegacyClient for HttpLegacyClient {
    async fn get(&self, path: &str, params: &Params) -> Result<Value, FetchError> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let timeout_ms = self.timeout.as_millis() as u64;

        let response = self
            .client
            .get(&url)
            .query(&query_pairs(params))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e, timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Upstream {
                status: status.as_u16(),
                url,
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e, timeout_ms))
    }
}

/// Exposes a [`LegacyClient`] with the same `load(path, params)` shape as
/// [`Loader`](crate::dataloader::Loader).
///
/// Each [`LoaderSet`](crate::loaders::LoaderSet) owns its own bridge, so the
/// cache lives exactly as long as one request. [`clear_all`](Self::clear_all)
/// is still run at the start of every request and can be used after writes
/// that invalidate what was read.
#[derive(Clone)]
pub struct LegacyLoaderBridge {
    client: Arc<dyn LegacyClient>,
    cache: RequestCache<ApiResponse>,
}

impl LegacyLoaderBridge {
    pub fn new(client: Arc<dyn LegacyClient>) -> Self {
        Self {
            client,
            cache: RequestCache::new(),
        }
    }

    pub async fn load(&self, path: &str, params: &Params) -> Result<ApiResponse, FetchError> {
        let key = cache_key(path, params);
        let client = Arc::clone(&self.client);
        let path = path.to_string();
        let params = params.clone();

        self.cache
            .get_or_load(key, move || async move {
                client.get(&path, &params).await.map(ApiResponse::new)
            })
            .await
    }

    /// Forget everything loaded through this bridge.
    pub fn clear_all(&self) {
        let dropped = self.cache.len();
        self.cache.clear_all();
        tracing::trace!(dropped, "legacy loader cache cleared");
    }
}

impl std::fmt::Debug for LegacyLoaderBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyLoaderBridge")
            .field("cached_calls", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LegacyClient for CountingClient {
        async fn get(&self, path: &str, _params: &Params) -> Result<Value, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({ "path": path, "call": n }))
        }
    }

    #[tokio::test]
    async fn repeated_calls_are_served_from_cache() {
        let client = Arc::new(CountingClient::default());
        let bridge = LegacyLoaderBridge::new(client.clone());

        let first = bridge.load("fairs", &Params::new()).await.unwrap();
        let second = bridge.load("fairs", &Params::new()).await.unwrap();

        assert_eq!(first.body, second.body);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_all_forces_a_fresh_backend_call() {
        let client = Arc::new(CountingClient::default());
        let bridge = LegacyLoaderBridge::new(client.clone());

        bridge.load("fairs", &Params::new()).await.unwrap();
        bridge.clear_all();
        let after = bridge.load("fairs", &Params::new()).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(after.body["call"], 2);
    }

    #[tokio::test]
    async fn bridges_of_different_requests_do_not_share_entries() {
        let client = Arc::new(CountingClient::default());
        let first_request = LegacyLoaderBridge::new(client.clone());
        let second_request = LegacyLoaderBridge::new(client.clone());

        first_request.load("fairs", &Params::new()).await.unwrap();
        second_request.load("fairs", &Params::new()).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }
}

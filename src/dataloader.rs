//! Per-request memoization and request coalescing for backend calls
//!
//! A [`Loader`] remembers every call it has issued during one request. The
//! in-flight future is stored *before* it is awaited, so concurrent callers
//! asking for the same key join the same backend call instead of issuing
//! their own.

use crate::error::FetchError;
use crate::fetch::{query_pairs, ApiClient, ApiResponse, FetchRequest, Params};
use async_graphql::dataloader::Loader as BatchLoader;
use futures::future::{BoxFuture, FutureExt, Shared};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

type SharedCall<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

/// Cache of in-flight and settled calls keyed by a stable string.
///
/// Settled failures stay cached, same as successes: a request sees one answer
/// per key.
pub struct RequestCache<V: Clone + Send + Sync + 'static> {
    entries: Arc<Mutex<HashMap<String, SharedCall<V>>>>,
}

impl<V: Clone + Send + Sync + 'static> RequestCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Return the cached call for `key`, or start `call` and cache it.
    pub async fn get_or_load<F, Fut>(&self, key: String, call: F) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let shared = {
            // Check and insert under one lock; never held across an await.
            let mut entries = self.lock();
            entries
                .entry(key)
                .or_insert_with(|| call().boxed().shared())
                .clone()
        };
        shared.await
    }

    /// Drop one key so the next call reaches the backend again
    pub fn clear(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop every key
    pub fn clear_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SharedCall<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone + Send + Sync + 'static> Default for RequestCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> Clone for RequestCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

/// Stable cache key for a `(path, params)` pair: object keys are sorted at
/// every depth, so `{a, b}` and `{b, a}` share an entry.
pub fn cache_key(path: &str, params: &Params) -> String {
    let mut out = String::from(path);
    out.push('?');
    write_canonical(&mut out, &Value::Object(params.clone()));
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(out, &map[key]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// A memoized GET loader for one logical resource.
///
/// # Example
///
/// ```ignore
/// let artist = loaders.unauthenticated.artist.load("andy-warhol", &Params::new()).await?;
/// // Served from the request cache, no second backend call
/// let again = loaders.unauthenticated.artist.load("andy-warhol", &Params::new()).await?;
/// ```
#[derive(Clone)]
pub struct Loader {
    name: &'static str,
    prefix: String,
    api: ApiClient,
    headers: HeaderMap,
    cache: RequestCache<ApiResponse>,
}

impl Loader {
    pub(crate) fn new(
        name: &'static str,
        prefix: impl Into<String>,
        api: ApiClient,
        headers: HeaderMap,
    ) -> Self {
        Self {
            name,
            prefix: prefix.into(),
            api,
            headers,
            cache: RequestCache::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolve `path` below this loader's resource prefix. An empty path hits
    /// the prefix itself (collection loaders).
    pub async fn load(&self, path: &str, params: &Params) -> Result<ApiResponse, FetchError> {
        let full_path = self.full_path(path);
        let key = cache_key(&full_path, params);

        let api = self.api.clone();
        let mut request = FetchRequest::get(api.url_for(&full_path));
        request.query = query_pairs(params);
        request.headers = self.headers.clone();
        let loader = self.name;

        self.cache
            .get_or_load(key, move || async move {
                let result = api.send(request).await;
                if let Err(err) = &result {
                    tracing::warn!(loader, error = %err, "loader call failed");
                }
                result
            })
            .await
    }

    /// Forget the cached answer for one call
    pub fn clear(&self, path: &str, params: &Params) {
        self.cache.clear(&cache_key(&self.full_path(path), params));
    }

    /// Number of distinct calls issued through this loader
    pub fn cached_calls(&self) -> usize {
        self.cache.len()
    }

    fn full_path(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("cached_calls", &self.cache.len())
            .finish()
    }
}

/// Uncached loader for writes. Each call reaches the backend.
#[derive(Clone)]
pub struct MutationLoader {
    name: &'static str,
    prefix: String,
    method: Method,
    api: ApiClient,
    headers: HeaderMap,
}

impl MutationLoader {
    pub(crate) fn new(
        name: &'static str,
        prefix: impl Into<String>,
        method: Method,
        api: ApiClient,
        headers: HeaderMap,
    ) -> Self {
        Self {
            name,
            prefix: prefix.into(),
            method,
            api,
            headers,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn send(&self, path: &str, body: Value) -> Result<ApiResponse, FetchError> {
        let path = path.trim_start_matches('/');
        let full_path = if path.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, path)
        };
        let mut request = FetchRequest::get(self.api.url_for(&full_path));
        request.method = self.method.clone();
        request.headers = self.headers.clone();
        request.body = Some(body);
        self.api.send(request).await
    }
}

/// Batches individual id lookups into one `GET <prefix>?id[]=..` call.
///
/// Used through async-graphql's [`DataLoader`](async_graphql::dataloader::DataLoader),
/// which collects the keys requested while the current resolvers run.
pub struct IdBatchLoader {
    prefix: String,
    api: ApiClient,
    headers: HeaderMap,
}

impl IdBatchLoader {
    pub(crate) fn new(prefix: impl Into<String>, api: ApiClient, headers: HeaderMap) -> Self {
        Self {
            prefix: prefix.into(),
            api,
            headers,
        }
    }
}

impl BatchLoader<String> for IdBatchLoader {
    type Value = Value;
    type Error = FetchError;

    async fn load(&self, keys: &[String]) -> Result<HashMap<String, Value>, FetchError> {
        let mut request = FetchRequest::get(self.api.url_for(&self.prefix));
        request.headers = self.headers.clone();
        request.query = keys
            .iter()
            .map(|key| ("id[]".to_string(), key.clone()))
            .collect();
        request.query.push(("size".to_string(), keys.len().to_string()));

        let response = self.api.send(request).await?;
        let items = match response.body {
            Value::Array(items) => items,
            _ => Vec::new(),
        };

        Ok(items
            .into_iter()
            .filter_map(|item| {
                let id = item.get("_id").or_else(|| item.get("id"))?.as_str()?.to_string();
                Some((id, item))
            })
            .collect())
    }
}

/// Build the header map a loader sends with every call.
pub(crate) fn loader_headers(pairs: &[(&'static str, Option<&str>)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let Some(value) = value {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockFetcher;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn cache_key_ignores_param_order() {
        let a = params(json!({"size": 10, "sort": "-date", "filter": {"b": 1, "a": 2}}));
        let b = params(json!({"filter": {"a": 2, "b": 1}, "sort": "-date", "size": 10}));
        assert_eq!(cache_key("artworks", &a), cache_key("artworks", &b));
        assert_ne!(cache_key("artworks", &a), cache_key("artists", &a));
    }

    #[tokio::test]
    async fn concurrent_identical_calls_share_one_backend_call() {
        let fetcher = MockFetcher::new().with_delay_ms(10);
        let api = fetcher.api_client("https://api.test");
        let loader = Loader::new("artist", "artist", api, HeaderMap::new());

        let params = Params::new();
        let calls = (0..10).map(|_| loader.load("andy-warhol", &params));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(fetcher.calls_to("https://api.test/artist/andy-warhol"), 1);
        assert_eq!(loader.cached_calls(), 1);
    }

    #[tokio::test]
    async fn different_params_are_different_calls() {
        let fetcher = MockFetcher::new();
        let api = fetcher.api_client("https://api.test");
        let loader = Loader::new("artworks", "artworks", api, HeaderMap::new());

        loader.load("", &params(json!({"size": 1}))).await.unwrap();
        loader.load("", &params(json!({"size": 2}))).await.unwrap();
        loader.load("", &params(json!({"size": 1}))).await.unwrap();

        assert_eq!(fetcher.total_calls(), 2);
    }

    #[tokio::test]
    async fn failures_reach_every_waiter_and_stay_cached() {
        let fetcher = MockFetcher::new()
            .with_delay_ms(5)
            .with_status("https://api.test/artist/nobody", 404);
        let api = fetcher.api_client("https://api.test");
        let loader = Loader::new("artist", "artist", api, HeaderMap::new());

        let params = Params::new();
        let (a, b) = tokio::join!(loader.load("nobody", &params), loader.load("nobody", &params));
        let err = a.unwrap_err();
        assert_eq!(err, b.unwrap_err());
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.url(), "https://api.test/artist/nobody");

        assert!(loader.load("nobody", &Params::new()).await.is_err());
        assert_eq!(fetcher.total_calls(), 1);

        loader.clear("nobody", &Params::new());
        assert!(loader.load("nobody", &Params::new()).await.is_err());
        assert_eq!(fetcher.total_calls(), 2);
    }

    #[tokio::test]
    async fn clearing_recovers_from_a_poisoned_lock() {
        let cache = RequestCache::<u32>::new();
        cache.get_or_load("fairs".into(), || async { Ok(1) }).await.unwrap();

        let entries = Arc::clone(&cache.entries);
        let _ = std::thread::spawn(move || {
            let _guard = entries.lock().unwrap();
            panic!("poison the cache lock");
        })
        .join();
        assert!(cache.entries.is_poisoned());

        assert_eq!(cache.len(), 1);
        cache.clear_all();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get_or_load("fairs".into(), || async { Ok(2) }).await, Ok(2));
    }

    #[tokio::test]
    async fn mutation_loader_never_caches() {
        let fetcher = MockFetcher::new();
        let api = fetcher.api_client("https://api.test");
        let loader = MutationLoader::new(
            "save_artwork",
            "collection/saved-artwork/artwork",
            Method::POST,
            api,
            HeaderMap::new(),
        );

        loader.send("a1", json!({"user_id": "u1"})).await.unwrap();
        loader.send("a1", json!({"user_id": "u1"})).await.unwrap();

        assert_eq!(
            fetcher.calls_to("https://api.test/collection/saved-artwork/artwork/a1"),
            2
        );
        assert_eq!(fetcher.requests()[0].method, Method::POST);
    }

    #[tokio::test]
    async fn id_batch_loader_indexes_results_by_id() {
        let fetcher = MockFetcher::new().with_body(
            "https://api.test/artworks",
            json!([{"_id": "a1", "title": "Soup"}, {"_id": "a2", "title": "Flowers"}]),
        );
        let api = fetcher.api_client("https://api.test");
        let loader = IdBatchLoader::new("artworks", api, HeaderMap::new());

        let found = loader
            .load(&["a1".to_string(), "a2".to_string(), "a3".to_string()])
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found["a2"]["title"], "Flowers");
        let query = &fetcher.requests()[0].query;
        assert_eq!(query.iter().filter(|(k, _)| k == "id[]").count(), 3);
    }
}

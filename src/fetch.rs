//! HTTP backend client used underneath the loaders

use crate::error::FetchError;
use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Query parameters of a loader call
pub type Params = serde_json::Map<String, Value>;

/// Timeout applied to every outbound call unless configured otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parsed backend response: JSON body plus headers (pagination metadata lives
/// in the headers).
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub body: Value,
    pub headers: HeaderMap,
}

impl ApiResponse {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    /// Read a numeric header such as `x-total-count`
    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    }
}

/// One outbound call
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Transport seam between loaders and the network.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<ApiResponse, FetchError>;
}

/// reqwest backed [`Fetch`] implementation
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Reuse an already configured reqwest client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<ApiResponse, FetchError> {
        let timeout_ms = request.timeout.as_millis() as u64;
        let url = request.url.clone();

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .query(&request.query)
            .headers(request.headers)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e, timeout_ms))?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e, timeout_ms))?;

        if !status.is_success() {
            return Err(FetchError::Upstream {
                status: status.as_u16(),
                url,
                body: text,
            });
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| FetchError::Decode {
                url: url.clone(),
                message: e.to_string(),
            })?
        };

        Ok(ApiResponse { body, headers })
    }
}

/// A backend service: base URL, static headers and the transport to reach it.
///
/// # Example
///
/// ```rust,no_run
/// use stitch_gateway::fetch::ApiClient;
///
/// let catalog = ApiClient::builder("https://catalog.internal/api/v1")
///     .app_token("app-secret")
///     .build();
/// ```
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    app_token: Option<String>,
    timeout: Duration,
    fetcher: Arc<dyn Fetch>,
}

impl ApiClient {
    /// Start building a client for the given base URL
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Join the base URL with a resource path
    pub fn url_for(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        }
    }

    /// Issue one request, adding the client's static headers
    pub async fn send(&self, mut request: FetchRequest) -> Result<ApiResponse, FetchError> {
        if let Some(token) = &self.app_token {
            if let Ok(value) = HeaderValue::from_str(token) {
                request.headers.insert("x-app-token", value);
            }
        }
        request.timeout = self.timeout;

        let url = request.url.clone();
        let timeout_ms = self.timeout.as_millis() as u64;
        tracing::debug!(method = %request.method, url = %url, "backend request");

        // The transport may not enforce its own deadline (test doubles, custom
        // fetchers), so the fixed timeout is applied here as well.
        match tokio::time::timeout(self.timeout, self.fetcher.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout { url, timeout_ms }),
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("app_token", &self.app_token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Builder for configuring an [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    app_token: Option<String>,
    timeout: Duration,
    fetcher: Option<Arc<dyn Fetch>>,
}

impl ApiClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            app_token: None,
            timeout: DEFAULT_TIMEOUT,
            fetcher: None,
        }
    }

    /// Application token sent as `x-app-token` on every call.
    pub fn app_token(mut self, token: impl Into<String>) -> Self {
        self.app_token = Some(token.into());
        self
    }

    /// Override the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a custom transport instead of reqwest.
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn build(self) -> ApiClient {
        ApiClient {
            base_url: self.base_url,
            app_token: self.app_token,
            timeout: self.timeout,
            fetcher: self
                .fetcher
                .unwrap_or_else(|| Arc::new(HttpFetcher::new())),
        }
    }
}

/// Flatten loader params into query pairs. Arrays become repeated `key[]`
/// pairs, nested objects are sent as JSON.
pub fn query_pairs(params: &Params) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    pairs.push((format!("{key}[]"), scalar_to_string(item)));
                }
            }
            other => pairs.push((key.clone(), scalar_to_string(other))),
        }
    }
    pairs
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

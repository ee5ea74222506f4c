//! Error types for the stitching gateway

use async_graphql::ErrorExtensions;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single outbound backend call.
///
/// Loaders share one in-flight call between every caller asking for the same
/// key, so the failure has to be cloneable to reach all of them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network level failure (connection refused, reset, TLS...)
    #[error("transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    /// The backend answered with a non-success status
    #[error("upstream returned {status} for {url}")]
    Upstream {
        status: u16,
        url: String,
        body: String,
    },

    /// The fixed per-call timeout elapsed
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    /// The response body could not be decoded
    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },

    /// The call was rejected before reaching the network
    #[error("invalid request to {url}: {message}")]
    InvalidRequest { url: String, message: String },
}

impl FetchError {
    /// URL of the failed call
    pub fn url(&self) -> &str {
        match self {
            FetchError::Transport { url, .. }
            | FetchError::Upstream { url, .. }
            | FetchError::Timeout { url, .. }
            | FetchError::Decode { url, .. }
            | FetchError::InvalidRequest { url, .. } => url,
        }
    }

    /// Status code, when the backend answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Field error carrying `code`, `url` and `status` extensions
    pub fn into_field_error(self) -> async_graphql::Error {
        Error::Fetch(self).into_field_error()
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout_ms,
            }
        } else if err.is_decode() {
            FetchError::Decode {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Main error type for the gateway
///
/// Field-level failures ([`Error::Fetch`], [`Error::Remote`]) are turned into
/// GraphQL errors next to partial data. [`Error::Composition`] is recovered by
/// serving the local schema alone. [`Error::NamingConflict`] aborts the build.
#[derive(Error, Debug)]
pub enum Error {
    /// Backend call failures
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A delegated GraphQL call answered with errors
    #[error("remote service {service} returned errors: {message}")]
    Remote { service: String, message: String },

    /// Introspection or merge failure while composing the schema
    #[error("schema composition failed: {0}")]
    Composition(String),

    /// Identifier field governance violation
    #[error("type {type_name} declares identifier field `{field}` without an ID marker; describe it as internal or public before exposing it")]
    NamingConflict { type_name: String, field: String },

    /// GraphQL schema errors
    #[error("GraphQL schema error: {0}")]
    Schema(String),

    /// Invalid request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication/authorization errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Middleware errors
    #[error("Middleware error: {0}")]
    Middleware(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Convert error to GraphQL error format
    pub fn to_graphql_error(&self) -> GraphQLError {
        GraphQLError {
            message: self.to_string(),
            extensions: self.extensions(),
        }
    }

    /// Convert into an error attached to the resolving field
    pub fn into_field_error(self) -> async_graphql::Error {
        let extensions = self.extensions();
        async_graphql::Error::new(self.to_string()).extend_with(move |_, ext| {
            for (key, value) in &extensions {
                if let Ok(value) = async_graphql::Value::from_json(value.clone()) {
                    ext.set(key.clone(), value);
                }
            }
        })
    }

    /// Error code reported under `extensions.code`
    pub fn code(&self) -> &'static str {
        match self {
            Error::Fetch(FetchError::Transport { .. }) => "TRANSPORT_ERROR",
            Error::Fetch(FetchError::Timeout { .. }) => "TIMEOUT",
            Error::Fetch(FetchError::Upstream { .. }) => "UPSTREAM_HTTP_ERROR",
            Error::Fetch(FetchError::Decode { .. }) => "DECODE_ERROR",
            Error::Fetch(FetchError::InvalidRequest { .. }) => "INVALID_REQUEST",
            Error::Remote { .. } => "REMOTE_ERROR",
            Error::Composition(_) => "SCHEMA_COMPOSITION_ERROR",
            Error::NamingConflict { .. } => "NAMING_CONFLICT",
            Error::Schema(_) => "SCHEMA_ERROR",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Middleware(_) => "MIDDLEWARE_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "UNKNOWN_ERROR",
        }
    }

    /// Get error code for extensions
    fn extensions(&self) -> std::collections::HashMap<String, serde_json::Value> {
        let mut map = std::collections::HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        if let Error::Fetch(fetch) = self {
            map.insert("url".to_string(), serde_json::json!(fetch.url()));
            if let Some(status) = fetch.status() {
                map.insert("status".to_string(), serde_json::json!(status));
            }
        }
        if let Error::Remote { service, .. } = self {
            map.insert("service".to_string(), serde_json::json!(service));
        }
        map
    }
}

/// GraphQL error response format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty", default)]
    pub extensions: std::collections::HashMap<String, serde_json::Value>,
}

impl From<Error> for GraphQLError {
    fn from(err: Error) -> Self {
        err.to_graphql_error()
    }
}

//! Links: how the gateway reaches remote GraphQL services

use crate::context::RequestScope;
use crate::error::{Error, FetchError, Result};
use crate::fetch::DEFAULT_TIMEOUT;
use crate::middleware::{prepare, LinkRequest, MiddlewareChain};
use crate::types::{GraphQLRequest, GraphQLResponse, RemoteError};
use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Headers and credentials of one delegated call. Built by the middleware
/// chain, dropped once the call completes.
#[derive(Debug, Clone, Default)]
pub struct DelegationContext {
    pub headers: HeaderMap,
    pub authorization_token: Option<String>,
}

impl DelegationContext {
    /// Set a header, ignoring values that are not valid header text
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }
}

/// Transport to one remote GraphQL service.
#[async_trait]
pub trait Link: Send + Sync {
    async fn execute(&self, request: GraphQLRequest, ctx: &DelegationContext)
        -> Result<GraphQLResponse>;
}

/// HTTP link posting GraphQL JSON to a remote endpoint
#[derive(Clone)]
pub struct HttpLink {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpLink {
    pub fn builder(endpoint: impl Into<String>) -> HttpLinkBuilder {
        HttpLinkBuilder {
            endpoint: endpoint.into(),
            client: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::builder(endpoint).build()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for HttpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLink")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl Link for HttpLink {
    async fn execute(
        &self,
        request: GraphQLRequest,
        ctx: &DelegationContext,
    ) -> Result<GraphQLResponse> {
        let timeout_ms = self.timeout.as_millis() as u64;
        let response = self
            .client
            .post(&self.endpoint)
            .headers(ctx.headers.clone())
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&self.endpoint, e, timeout_ms))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&self.endpoint, e, timeout_ms))?;

        if !status.is_success() {
            return Err(FetchError::Upstream {
                status: status.as_u16(),
                url: self.endpoint.clone(),
                body: text,
            }
            .into());
        }

        serde_json::from_str(&text).map_err(|e| {
            FetchError::Decode {
                url: self.endpoint.clone(),
                message: e.to_string(),
            }
            .into()
        })
    }
}

/// Builder for configuring an [`HttpLink`].
pub struct HttpLinkBuilder {
    endpoint: String,
    client: Option<reqwest::Client>,
    timeout: Duration,
}

impl HttpLinkBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> HttpLink {
        HttpLink {
            endpoint: self.endpoint,
            client: self.client.unwrap_or_default(),
            timeout: self.timeout,
        }
    }
}

/// A remote service ready to receive delegated operations: its link, its
/// auth requirement and the middleware chain preparing each call.
#[derive(Clone)]
pub struct RemoteExecutor {
    name: String,
    link: Arc<dyn Link>,
    requires_auth: bool,
    middleware: MiddlewareChain,
    timeout: Duration,
}

impl RemoteExecutor {
    pub fn new(
        name: impl Into<String>,
        link: Arc<dyn Link>,
        requires_auth: bool,
        middleware: MiddlewareChain,
    ) -> Self {
        Self {
            name: name.into(),
            link,
            requires_auth,
            middleware,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    /// Send `request` on behalf of `scope` and return its `data`.
    ///
    /// Errors reported by the remote service fail the call only when it
    /// returned no data at all; partial errors are logged and dropped. Use
    /// [`execute_partial`](Self::execute_partial) to keep them.
    pub async fn execute(
        &self,
        request: GraphQLRequest,
        scope: Option<&RequestScope>,
    ) -> Result<Value> {
        let (data, errors) = self.execute_partial(request, scope).await?;
        if !errors.is_empty() {
            tracing::warn!(
                service = %self.name,
                errors = ?errors,
                "remote service returned partial data"
            );
        }
        Ok(data)
    }

    /// Like [`execute`](Self::execute), but also returns the errors the remote
    /// service reported next to its data.
    pub async fn execute_partial(
        &self,
        request: GraphQLRequest,
        scope: Option<&RequestScope>,
    ) -> Result<(Value, Vec<RemoteError>)> {
        let link_request = LinkRequest {
            service: &self.name,
            requires_auth: self.requires_auth,
            scope,
            operation: &request,
        };
        let ctx = prepare(&self.middleware, &link_request).await?;

        let response = tokio::time::timeout(self.timeout, self.link.execute(request, &ctx))
            .await
            .map_err(|_| FetchError::Timeout {
                url: self.name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        match response.data {
            Some(data) if !data.is_null() => Ok((data, response.errors)),
            _ if !response.errors.is_empty() => Err(Error::Remote {
                service: self.name.clone(),
                message: response
                    .errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            }),
            _ => Ok((Value::Null, Vec::new())),
        }
    }
}

impl std::fmt::Debug for RemoteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteExecutor")
            .field("name", &self.name)
            .field("requires_auth", &self.requires_auth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::default_chain;

    struct Canned(GraphQLResponse);

    #[async_trait]
    impl Link for Canned {
        async fn execute(
            &self,
            _request: GraphQLRequest,
            _ctx: &DelegationContext,
        ) -> Result<GraphQLResponse> {
            Ok(self.0.clone())
        }
    }

    fn executor(response: GraphQLResponse) -> RemoteExecutor {
        RemoteExecutor::new("auctions", Arc::new(Canned(response)), false, default_chain())
    }

    #[tokio::test]
    async fn data_is_returned_on_success() {
        let data = serde_json::json!({"ping": "pong"});
        let value = executor(GraphQLResponse::success(data.clone()))
            .execute(GraphQLRequest::new("{ ping }"), None)
            .await
            .unwrap();
        assert_eq!(value, data);
    }

    #[tokio::test]
    async fn errors_without_data_fail_the_call() {
        let response = GraphQLResponse {
            data: None,
            errors: vec![RemoteError {
                message: "Unknown field".into(),
                path: None,
                extensions: None,
            }],
        };

        let err = executor(response)
            .execute(GraphQLRequest::new("{ nope }"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote { ref service, .. } if service == "auctions"));
        assert!(err.to_string().contains("Unknown field"));
    }

    #[tokio::test]
    async fn partial_errors_are_returned_with_the_data() {
        let response = GraphQLResponse {
            data: Some(serde_json::json!({"sale": {"name": "Spring", "lots": null}})),
            errors: vec![RemoteError {
                message: "lots unavailable".into(),
                path: Some(vec![serde_json::json!("sale"), serde_json::json!("lots")]),
                extensions: None,
            }],
        };

        let (data, errors) = executor(response)
            .execute_partial(GraphQLRequest::new("{ sale { name lots } }"), None)
            .await
            .unwrap();

        assert_eq!(data["sale"]["name"], "Spring");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "lots unavailable");
    }

    #[test]
    fn set_header_skips_invalid_values() {
        let mut ctx = DelegationContext::default();
        ctx.set_header("x-request-id", "abc");
        ctx.set_header("x-bad", "line\nbreak");
        assert_eq!(ctx.headers["x-request-id"], "abc");
        assert!(ctx.headers.get("x-bad").is_none());
    }
}

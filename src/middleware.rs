//! Middleware run before every delegated call to a remote service
//!
//! Each middleware adjusts the [`DelegationContext`] of one outbound call.
//! They run in order and each is awaited before the next starts, so the token
//! is resolved before the request that needs it is sent.

use crate::context::{RequestScope, FORWARDED_FOR_HEADER, REQUEST_ID_HEADER};
use crate::error::{Error, Result};
use crate::fetch::Params;
use crate::link::DelegationContext;
use crate::types::GraphQLRequest;
use http::header::AUTHORIZATION;
use http::HeaderValue;
use std::sync::Arc;

/// What a middleware knows about the call it is preparing
pub struct LinkRequest<'a> {
    /// Name of the remote service
    pub service: &'a str,
    /// Whether the remote schema expects an end-user token
    pub requires_auth: bool,
    /// The originating request, absent for gateway-initiated calls such as
    /// introspection
    pub scope: Option<&'a RequestScope>,
    pub operation: &'a GraphQLRequest,
}

/// Middleware trait for delegated calls
///
/// # Example
///
/// ```rust
/// use stitch_gateway::link::DelegationContext;
/// use stitch_gateway::middleware::{LinkMiddleware, LinkRequest};
/// use stitch_gateway::Result;
///
/// struct ClientName;
///
/// #[async_trait::async_trait]
/// impl LinkMiddleware for ClientName {
///     async fn call(&self, ctx: &mut DelegationContext, _request: &LinkRequest<'_>) -> Result<()> {
///         ctx.set_header("x-client-name", "stitch-gateway");
///         Ok(())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait LinkMiddleware: Send + Sync {
    async fn call(&self, ctx: &mut DelegationContext, request: &LinkRequest<'_>) -> Result<()>;
}

/// Ordered middleware chain shared by every remote service
pub type MiddlewareChain = Arc<Vec<Arc<dyn LinkMiddleware>>>;

/// Request id, forwarded-for and tracing headers, added to every call.
#[derive(Debug, Clone, Default)]
pub struct RequestHeadersMiddleware;

#[async_trait::async_trait]
impl LinkMiddleware for RequestHeadersMiddleware {
    async fn call(&self, ctx: &mut DelegationContext, request: &LinkRequest<'_>) -> Result<()> {
        let Some(scope) = request.scope else {
            ctx.set_header(REQUEST_ID_HEADER, "gateway");
            return Ok(());
        };
        let context = &scope.context;
        ctx.set_header(REQUEST_ID_HEADER, &context.request_id);
        if !context.x_forwarded_for.is_empty() {
            ctx.set_header(FORWARDED_FOR_HEADER, &context.x_forwarded_for);
        }
        if let Some(span_id) = context.span.id() {
            ctx.set_header("x-span-id", &span_id.into_u64().to_string());
        }
        Ok(())
    }
}

/// Attaches the caller's token when the target requires it.
///
/// The token comes from the request's `delegation_token` loader, so it is
/// fetched at most once per request and never outlives it. Without a token
/// loader (anonymous caller, introspection) the call goes out unauthenticated.
#[derive(Debug, Clone, Default)]
pub struct BearerTokenMiddleware;

#[async_trait::async_trait]
impl LinkMiddleware for BearerTokenMiddleware {
    async fn call(&self, ctx: &mut DelegationContext, request: &LinkRequest<'_>) -> Result<()> {
        if !request.requires_auth {
            return Ok(());
        }
        let Some(loader) = request
            .scope
            .and_then(|scope| scope.loaders.delegation_token())
        else {
            return Ok(());
        };

        let response = loader.load("", &Params::new()).await?;
        let token = response
            .body
            .get("token")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                Error::Unauthorized(format!(
                    "token exchange for {} returned no token",
                    request.service
                ))
            })?;

        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::Middleware(format!("invalid bearer token: {e}")))?;
        ctx.headers.insert(AUTHORIZATION, value);
        ctx.authorization_token = Some(token.to_string());
        Ok(())
    }
}

/// Logging middleware
///
/// Logs outgoing delegated operations using the `tracing` crate.
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl LinkMiddleware for LoggingMiddleware {
    async fn call(&self, ctx: &mut DelegationContext, request: &LinkRequest<'_>) -> Result<()> {
        tracing::debug!(
            service = request.service,
            authenticated = ctx.authorization_token.is_some(),
            query = %request.operation.query,
            "delegating to remote service"
        );
        Ok(())
    }
}

/// The chain used when none is configured
pub fn default_chain() -> MiddlewareChain {
    Arc::new(vec![
        Arc::new(RequestHeadersMiddleware) as Arc<dyn LinkMiddleware>,
        Arc::new(BearerTokenMiddleware),
        Arc::new(LoggingMiddleware),
    ])
}

/// Run `chain` in order and return the finished context
pub async fn prepare(chain: &MiddlewareChain, request: &LinkRequest<'_>) -> Result<DelegationContext> {
    let mut ctx = DelegationContext::default();
    for middleware in chain.iter() {
        middleware.call(&mut ctx, request).await?;
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::fetch::ApiResponse;
    use crate::loaders::LoaderFactory;
    use crate::test_support::MockFetcher;
    use serde_json::json;

    fn scope(fetcher: &MockFetcher, token: Option<&str>) -> RequestScope {
        let mut context = RequestContext::anonymous("req-9");
        context.access_token = token.map(String::from);
        context.x_forwarded_for = "198.51.100.4".into();
        let loaders = LoaderFactory::builder(fetcher.api_client("https://api.test"))
            .build()
            .for_context(&context);
        RequestScope::new(context, loaders)
    }

    fn token_fetcher() -> MockFetcher {
        MockFetcher::new().with_responder(|_| Ok(ApiResponse::new(json!({"token": "jwt-123"}))))
    }

    #[tokio::test]
    async fn request_headers_are_always_attached() {
        let fetcher = token_fetcher();
        let scope = scope(&fetcher, None);
        let operation = GraphQLRequest::new("{ ping }");
        let request = LinkRequest {
            service: "auctions",
            requires_auth: false,
            scope: Some(&scope),
            operation: &operation,
        };

        let ctx = prepare(&default_chain(), &request).await.unwrap();

        assert_eq!(ctx.headers[REQUEST_ID_HEADER], "req-9");
        assert_eq!(ctx.headers[FORWARDED_FOR_HEADER], "198.51.100.4");
        assert!(ctx.headers.get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn bearer_token_is_attached_when_required_and_available() {
        let fetcher = token_fetcher();
        let scope = scope(&fetcher, Some("access"));
        let operation = GraphQLRequest::new("{ me { name } }");
        let request = LinkRequest {
            service: "auctions",
            requires_auth: true,
            scope: Some(&scope),
            operation: &operation,
        };

        let ctx = prepare(&default_chain(), &request).await.unwrap();
        let again = prepare(&default_chain(), &request).await.unwrap();

        assert_eq!(ctx.headers[AUTHORIZATION], "Bearer jwt-123");
        assert_eq!(ctx.authorization_token.as_deref(), Some("jwt-123"));
        assert_eq!(again.headers[AUTHORIZATION], "Bearer jwt-123");
        assert_eq!(fetcher.calls_to("https://api.test/me/token"), 1);
    }

    #[tokio::test]
    async fn no_user_context_means_no_authorization_header() {
        let fetcher = token_fetcher();
        let scope = scope(&fetcher, None);
        let operation = GraphQLRequest::new("{ me { name } }");

        for scope in [Some(&scope), None] {
            let request = LinkRequest {
                service: "auctions",
                requires_auth: true,
                scope,
                operation: &operation,
            };
            let ctx = prepare(&default_chain(), &request).await.unwrap();
            assert!(ctx.headers.get(AUTHORIZATION).is_none());
        }
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn public_services_never_trigger_the_token_exchange() {
        let fetcher = token_fetcher();
        let scope = scope(&fetcher, Some("access"));
        let operation = GraphQLRequest::new("{ ping }");
        let request = LinkRequest {
            service: "catalog",
            requires_auth: false,
            scope: Some(&scope),
            operation: &operation,
        };

        let ctx = prepare(&default_chain(), &request).await.unwrap();

        assert!(ctx.authorization_token.is_none());
        assert_eq!(fetcher.total_calls(), 0);
    }
}

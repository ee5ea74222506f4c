//! Per-request context: caller identity, request id and the loaders bound to them

use crate::loaders::LoaderSet;
use http::HeaderMap;

/// Caller access token header
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";
/// Caller user id header
pub const USER_ID_HEADER: &str = "x-user-id";
/// Request id header, propagated to every backend
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Forwarded-for chain header
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Caller timezone header
pub const TIMEZONE_HEADER: &str = "x-timezone";

/// Identity and tracing data of one inbound request.
///
/// Built once from the inbound headers and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub access_token: Option<String>,
    pub user_id: Option<String>,
    pub request_id: String,
    pub x_forwarded_for: String,
    pub timezone: Option<String>,
    pub span: tracing::Span,
}

impl RequestContext {
    /// Read the caller's identity from inbound headers. A request id is
    /// generated when the caller did not send one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let request_id =
            header(headers, REQUEST_ID_HEADER).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span = tracing::info_span!("graphql_request", request_id = %request_id);

        Self {
            access_token: header(headers, ACCESS_TOKEN_HEADER),
            user_id: header(headers, USER_ID_HEADER),
            request_id,
            x_forwarded_for: header(headers, FORWARDED_FOR_HEADER).unwrap_or_default(),
            timezone: header(headers, TIMEZONE_HEADER),
            span,
        }
    }

    /// Context for work the gateway does on its own behalf (introspection,
    /// warm-up): no caller identity.
    pub fn anonymous(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let span = tracing::info_span!("gateway_request", request_id = %request_id);
        Self {
            access_token: None,
            user_id: None,
            request_id,
            x_forwarded_for: String::new(),
            timezone: None,
            span,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}

/// Everything a resolver needs about the current request: the context and
/// the loaders created for it. Attached to the GraphQL request data, dropped
/// with the response.
#[derive(Debug)]
pub struct RequestScope {
    pub context: RequestContext,
    pub loaders: LoaderSet,
}

impl RequestScope {
    pub fn new(context: RequestContext, loaders: LoaderSet) -> Self {
        Self { context, loaders }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn identity_is_read_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_TOKEN_HEADER, HeaderValue::from_static("secret"));
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("user-1"));
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-1"));
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("10.0.0.1"));
        headers.insert(TIMEZONE_HEADER, HeaderValue::from_static("Europe/Berlin"));

        let ctx = RequestContext::from_headers(&headers);

        assert_eq!(ctx.access_token.as_deref(), Some("secret"));
        assert_eq!(ctx.user_id.as_deref(), Some("user-1"));
        assert_eq!(ctx.request_id, "req-1");
        assert_eq!(ctx.x_forwarded_for, "10.0.0.1");
        assert_eq!(ctx.timezone.as_deref(), Some("Europe/Berlin"));
        assert!(ctx.is_authenticated());
    }

    #[test]
    fn missing_request_id_is_generated() {
        let a = RequestContext::from_headers(&HeaderMap::new());
        let b = RequestContext::from_headers(&HeaderMap::new());

        assert!(!a.request_id.is_empty());
        assert_ne!(a.request_id, b.request_id);
        assert!(!a.is_authenticated());
    }
}

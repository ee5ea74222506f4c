//! Runtime support for the gateway - HTTP integration.

use crate::context::{RequestContext, RequestScope};
use crate::error::{Error, GraphQLError, Result};
use crate::loaders::LoaderFactory;
use crate::stitching::{ComposedSchema, SchemaComposer};
use async_graphql::{Pos, ServerError, Value as GqlValue};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    extract::State,
    http::HeaderMap,
    response::{Html, IntoResponse},
    routing::post,
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Deployment environment. Outside production, responses carry the request
/// id and timing under `extensions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Parse `production`/`development` (any case); anything else is
    /// development
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// Lazily composed schema shared by every request.
///
/// The first caller runs composition; concurrent callers wait for it. A failed
/// composition is not cached, so the next request tries again.
#[derive(Clone)]
pub struct SchemaHandle {
    composer: Option<Arc<Mutex<SchemaComposer>>>,
    composed: Arc<OnceCell<ComposedSchema>>,
}

impl SchemaHandle {
    pub fn new(composer: SchemaComposer) -> Self {
        Self {
            composer: Some(Arc::new(Mutex::new(composer))),
            composed: Arc::new(OnceCell::new()),
        }
    }

    /// Handle around an already composed schema
    pub fn ready(composed: ComposedSchema) -> Self {
        Self {
            composer: None,
            composed: Arc::new(OnceCell::new_with(Some(composed))),
        }
    }

    pub fn is_composed(&self) -> bool {
        self.composed.initialized()
    }

    pub async fn get(&self) -> Result<&ComposedSchema> {
        self.composed
            .get_or_try_init(|| async {
                let composer = self
                    .composer
                    .as_ref()
                    .ok_or_else(|| Error::Internal("schema handle has no composer".into()))?;
                composer.lock().await.compose().await
            })
            .await
    }
}

type ErrorHandler = Arc<dyn Fn(Vec<GraphQLError>) + Send + Sync>;

/// ServeMux - main gateway handler
///
/// For each request the `ServeMux` builds the request context from the
/// inbound headers, creates a fresh loader set, and executes the query
/// against the composed schema inside the request's span. It can be
/// converted into an Axum router.
pub struct ServeMux {
    schema: SchemaHandle,
    loaders: LoaderFactory,
    environment: Environment,
    error_handler: Option<ErrorHandler>,
}

impl ServeMux {
    pub fn new(schema: SchemaHandle, loaders: LoaderFactory) -> Self {
        Self {
            schema,
            loaders,
            environment: Environment::default(),
            error_handler: None,
        }
    }

    pub fn set_environment(&mut self, environment: Environment) {
        self.environment = environment;
    }

    /// Set error handler from an `Arc` for cases where the caller already shares ownership.
    pub fn set_error_handler_arc(&mut self, handler: ErrorHandler) {
        self.error_handler = Some(handler);
    }

    /// Set error handler
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: Fn(Vec<GraphQLError>) + Send + Sync + 'static,
    {
        self.set_error_handler_arc(Arc::new(handler));
    }

    pub fn schema(&self) -> &SchemaHandle {
        &self.schema
    }

    async fn execute(
        &self,
        context: RequestContext,
        request: async_graphql::Request,
    ) -> Result<async_graphql::Response> {
        let started = Instant::now();
        let composed = self.schema.get().await?;

        let loaders = self.loaders.for_context(&context);
        loaders.legacy.clear_all();
        let request_id = context.request_id.clone();
        let request = request.data(RequestScope::new(context, loaders));

        let mut response = composed.schema().execute(request).await;

        if !response.errors.is_empty() {
            tracing::warn!(errors = response.errors.len(), "request completed with errors");
            if let Some(handler) = &self.error_handler {
                handler(response.errors.iter().map(graphql_error).collect());
            }
        }

        if !self.environment.is_production() {
            let total_ms = started.elapsed().as_millis() as u64;
            response
                .extensions
                .insert("requestID".to_string(), GqlValue::String(request_id));
            let mut timing = async_graphql::indexmap::IndexMap::new();
            timing.insert(
                async_graphql::Name::new("totalMs"),
                GqlValue::Number(total_ms.into()),
            );
            response
                .extensions
                .insert("timing".to_string(), GqlValue::Object(timing));
        }

        Ok(response)
    }

    /// Handle GraphQL HTTP request
    ///
    /// This method executes the request pipeline:
    /// 1. Creates the request context (and its span) from headers
    /// 2. Builds the per-request loaders and resets the legacy cache
    /// 3. Executes the GraphQL query against the composed schema
    /// 4. Handles any errors
    pub async fn handle_http(&self, headers: HeaderMap, request: GraphQLRequest) -> GraphQLResponse {
        let context = RequestContext::from_headers(&headers);
        let span = context.span.clone();

        async move {
            match self.execute(context, request.into_inner()).await {
                Ok(resp) => resp.into(),
                Err(err) => {
                    tracing::error!(error = %err, "request failed before execution");
                    let gql_err = err.to_graphql_error();
                    if let Some(handler) = &self.error_handler {
                        handler(vec![gql_err]);
                    }
                    let server_err = err.into_field_error().into_server_error(Pos::default());
                    async_graphql::Response::from_errors(vec![server_err]).into()
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Convert to Axum router
    pub fn into_router(self) -> Router {
        let state = Arc::new(self);

        Router::new()
            .route(
                "/graphql",
                post(handle_graphql_post).get(graphql_playground),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

impl Clone for ServeMux {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            loaders: self.loaders.clone(),
            environment: self.environment,
            error_handler: self.error_handler.clone(),
        }
    }
}

fn graphql_error(err: &ServerError) -> GraphQLError {
    let extensions = err
        .extensions
        .as_ref()
        .and_then(|ext| serde_json::to_value(ext).ok())
        .and_then(|value| match value {
            serde_json::Value::Object(map) => Some(map.into_iter().collect()),
            _ => None,
        })
        .unwrap_or_default();
    GraphQLError {
        message: err.message.clone(),
        extensions,
    }
}

/// Handler for POST requests to /graphql
async fn handle_graphql_post(
    State(mux): State<Arc<ServeMux>>,
    headers: HeaderMap,
    request: GraphQLRequest,
) -> impl IntoResponse {
    mux.handle_http(headers, request).await
}

/// Serve the GraphQL Playground UI for ad-hoc exploration.
async fn graphql_playground() -> impl IntoResponse {
    Html(async_graphql::http::playground_source(
        async_graphql::http::GraphQLPlaygroundConfig::new("/graphql"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ApiResponse;
    use crate::stitching::LocalSchema;
    use crate::test_support::MockFetcher;
    use async_graphql::dynamic::{FieldFuture, FieldValue};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;
    use tower::ServiceExt;

    fn local_schema() -> LocalSchema {
        LocalSchema::new("type Query { me: String }").resolver("Query", "me", |ctx| {
            FieldFuture::new(async move {
                let scope = ctx.data::<RequestScope>()?;
                let Some(auth) = scope.loaders.authenticated.as_ref() else {
                    return Ok(None);
                };
                let me = auth
                    .me
                    .load("", &Default::default())
                    .await
                    .map_err(crate::error::FetchError::into_field_error)?;
                Ok(me.body.get("name").and_then(Value::as_str).map(|name| {
                    FieldValue::value(GqlValue::String(format!("{name} ({})", scope.context.request_id)))
                }))
            })
        })
    }

    fn mux(environment: Environment) -> (ServeMux, MockFetcher) {
        let fetcher = MockFetcher::new()
            .with_responder(|_| Ok(ApiResponse::new(json!({"name": "Percy"}))));
        let loaders = LoaderFactory::builder(fetcher.api_client("https://api.test")).build();
        let mut mux = ServeMux::new(
            SchemaHandle::new(SchemaComposer::new(local_schema())),
            loaders,
        );
        mux.set_environment(environment);
        (mux, fetcher)
    }

    async fn post(app: Router, headers: &[(&str, &str)], query: &str) -> Value {
        let mut request = Request::builder()
            .method("POST")
            .uri("/graphql")
            .header("content-type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = app
            .oneshot(
                request
                    .body(Body::from(json!({ "query": query }).to_string()))
                    .expect("build request"),
            )
            .await
            .expect("receive response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("json body")
    }

    #[tokio::test]
    async fn playground_served_on_get() {
        let (mux, _) = mux(Environment::Development);
        let response = mux
            .into_router()
            .oneshot(
                Request::builder()
                    .uri("/graphql")
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("receive response");

        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("read body");
        let body_str = String::from_utf8(body.to_vec()).expect("utf8 body");

        assert!(
            body_str.contains("GraphQL Playground"),
            "playground HTML should be returned"
        );
    }

    #[tokio::test]
    async fn request_headers_reach_the_loaders() {
        let (mux, fetcher) = mux(Environment::Development);
        let body = post(
            mux.into_router(),
            &[("x-access-token", "secret"), ("x-request-id", "req-42")],
            "{ me }",
        )
        .await;

        assert_eq!(body["data"]["me"], "Percy (req-42)");
        assert_eq!(body["extensions"]["requestID"], "req-42");
        assert!(body["extensions"]["timing"]["totalMs"].is_u64());

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].headers["x-access-token"], "secret");
        assert_eq!(requests[0].headers["x-request-id"], "req-42");
    }

    #[tokio::test]
    async fn production_responses_omit_debug_extensions() {
        let (mux, fetcher) = mux(Environment::Production);
        let body = post(mux.into_router(), &[], "{ me }").await;

        assert_eq!(body["data"]["me"], Value::Null);
        assert!(body.get("extensions").is_none());
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn errors_reach_the_error_handler() {
        let (mut mux, _) = mux(Environment::Production);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        mux.set_error_handler(move |errors| sink.lock().unwrap().extend(errors));

        let body = post(mux.into_router(), &[], "{ nope }").await;

        assert!(body["errors"].is_array());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn schema_is_composed_once_on_first_use() {
        let handle = SchemaHandle::new(SchemaComposer::new(local_schema()));
        assert!(!handle.is_composed());

        let first = tokio_test::block_on(handle.get()).map(|c| c.type_names());
        tokio_test::assert_ok!(&first);
        assert!(handle.is_composed());
        let again = tokio_test::block_on(handle.get()).map(|c| c.type_names());
        assert_eq!(first.unwrap(), again.unwrap());
    }

    #[test]
    fn environment_names() {
        assert!(Environment::from_name("PRODUCTION").is_production());
        assert!(!Environment::from_name("staging").is_production());
    }
}

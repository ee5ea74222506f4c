//! Test doubles shared by the unit tests

use crate::error::{FetchError, Result};
use crate::fetch::{ApiClient, ApiResponse, Fetch, FetchRequest};
use crate::link::{DelegationContext, Link};
use crate::types::{GraphQLRequest, GraphQLResponse};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = dyn Fn(&FetchRequest) -> std::result::Result<ApiResponse, FetchError> + Send + Sync;

/// Records every request; answers with canned bodies, statuses or a closure.
#[derive(Clone, Default)]
pub struct MockFetcher {
    requests: Arc<Mutex<Vec<FetchRequest>>>,
    bodies: Arc<HashMap<String, Value>>,
    statuses: Arc<HashMap<String, u16>>,
    responder: Option<Arc<Responder>>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn with_body(mut self, url: &str, body: Value) -> Self {
        let mut bodies = (*self.bodies).clone();
        bodies.insert(url.to_string(), body);
        self.bodies = Arc::new(bodies);
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        let mut statuses = (*self.statuses).clone();
        statuses.insert(url.to_string(), status);
        self.statuses = Arc::new(statuses);
        self
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&FetchRequest) -> std::result::Result<ApiResponse, FetchError>
            + Send
            + Sync
            + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn api_client(&self, base_url: &str) -> ApiClient {
        ApiClient::builder(base_url)
            .fetcher(Arc::new(self.clone()))
            .build()
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url == url)
            .count()
    }
}

#[async_trait]
impl Fetch for MockFetcher {
    async fn fetch(&self, request: FetchRequest) -> std::result::Result<ApiResponse, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(responder) = &self.responder {
            return responder(&request);
        }
        if let Some(status) = self.statuses.get(&request.url) {
            return Err(FetchError::Upstream {
                status: *status,
                url: request.url.clone(),
                body: String::new(),
            });
        }
        if let Some(body) = self.bodies.get(&request.url) {
            return Ok(ApiResponse::new(body.clone()));
        }
        let id = request.url.rsplit('/').next().unwrap_or_default().to_string();
        Ok(ApiResponse::new(json!({ "id": id, "url": request.url })))
    }
}

/// A remote GraphQL service living in-process: requests are executed against
/// an async-graphql schema and recorded together with their delegation
/// context.
pub struct SchemaLink<Q, M, S> {
    schema: async_graphql::Schema<Q, M, S>,
    calls: Arc<Mutex<Vec<(GraphQLRequest, DelegationContext)>>>,
    fail_introspection: bool,
}

impl<Q, M, S> SchemaLink<Q, M, S> {
    pub fn new(schema: async_graphql::Schema<Q, M, S>) -> Self {
        Self {
            schema,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_introspection: false,
        }
    }

    pub fn failing_introspection(mut self) -> Self {
        self.fail_introspection = true;
        self
    }

    pub fn calls(&self) -> Vec<(GraphQLRequest, DelegationContext)> {
        self.calls.lock().unwrap().clone()
    }

    /// Requests other than the boot-time introspection
    pub fn delegated_calls(&self) -> Vec<(GraphQLRequest, DelegationContext)> {
        self.calls()
            .into_iter()
            .filter(|(request, _)| !request.query.contains("__schema"))
            .collect()
    }
}

impl<Q, M, S> Clone for SchemaLink<Q, M, S> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            calls: Arc::clone(&self.calls),
            fail_introspection: self.fail_introspection,
        }
    }
}

#[async_trait]
impl<Q, M, S> Link for SchemaLink<Q, M, S>
where
    Q: async_graphql::ObjectType + 'static,
    M: async_graphql::ObjectType + 'static,
    S: async_graphql::SubscriptionType + 'static,
{
    async fn execute(
        &self,
        request: GraphQLRequest,
        ctx: &DelegationContext,
    ) -> Result<GraphQLResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((request.clone(), ctx.clone()));

        if self.fail_introspection && request.query.contains("__schema") {
            return Err(FetchError::Transport {
                url: "memory://remote".into(),
                message: "connection refused".into(),
            }
            .into());
        }

        let variables = async_graphql::Variables::from_json(Value::Object(
            request.variables.clone().into_iter().collect(),
        ));
        let mut gql = async_graphql::Request::new(request.query.clone()).variables(variables);
        if let Some(name) = &request.operation_name {
            gql = gql.operation_name(name);
        }
        let response = self.schema.execute(gql).await;
        Ok(serde_json::from_value(serde_json::to_value(&response)?)?)
    }
}

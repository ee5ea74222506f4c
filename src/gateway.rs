//! Gateway builder and main orchestration

use crate::error::{Error, GraphQLError, Result};
use crate::id_transform::IdTransform;
use crate::loaders::LoaderFactory;
use crate::middleware::{default_chain, LinkMiddleware};
use crate::runtime::{Environment, SchemaHandle, ServeMux};
use crate::stitching::{ComposedSchema, LocalSchema, RemoteService, SchemaComposer};
use axum::Router;
use std::sync::Arc;

/// Main Gateway struct - entry point for the library
pub struct Gateway {
    mux: ServeMux,
}

impl Gateway {
    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Get the ServeMux
    pub fn mux(&self) -> &ServeMux {
        &self.mux
    }

    /// The composed schema, composing it on first use
    pub async fn schema(&self) -> Result<&ComposedSchema> {
        self.mux.schema().get().await
    }

    /// Convert gateway into Axum router
    pub fn into_router(self) -> Router {
        self.mux.into_router()
    }
}

/// Builder for creating a Gateway
pub struct GatewayBuilder {
    local: LocalSchema,
    remotes: Vec<RemoteService>,
    id_transform: IdTransform,
    middlewares: Vec<Arc<dyn LinkMiddleware>>,
    loader_factory: Option<LoaderFactory>,
    environment: Environment,
    error_handler: Option<Arc<dyn Fn(Vec<GraphQLError>) + Send + Sync>>,
}

impl GatewayBuilder {
    /// Create a new gateway builder
    pub fn new() -> Self {
        Self {
            local: LocalSchema::default(),
            remotes: Vec::new(),
            id_transform: IdTransform::default(),
            middlewares: Vec::new(),
            loader_factory: None,
            environment: Environment::default(),
            error_handler: None,
        }
    }

    /// The gateway's own schema and resolvers
    pub fn local_schema(mut self, local: LocalSchema) -> Self {
        self.local = local;
        self
    }

    /// Add a remote service. Services added later win type-name collisions.
    pub fn add_remote(mut self, service: RemoteService) -> Self {
        self.remotes.push(service);
        self
    }

    /// Add many remote services in one shot.
    pub fn add_remotes<I>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = RemoteService>,
    {
        self.remotes.extend(services);
        self
    }

    /// Add middleware run before every delegated call, after the built-in
    /// request-header, bearer-token and logging middleware
    pub fn add_middleware<M: LinkMiddleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn with_id_transform(mut self, transform: IdTransform) -> Self {
        self.id_transform = transform;
        self
    }

    /// Loaders created for every request
    pub fn with_loader_factory(mut self, factory: LoaderFactory) -> Self {
        self.loader_factory = Some(factory);
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Provide a handler to inspect/augment GraphQL errors before they are returned.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Vec<GraphQLError>) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Build the gateway. The schema is composed on the first request (or by
    /// [`serve`](Self::serve) before it starts listening).
    pub fn build(self) -> Result<Gateway> {
        let loaders = self
            .loader_factory
            .ok_or_else(|| Error::Internal("a loader factory is required".into()))?;

        let mut chain = default_chain().as_ref().clone();
        chain.extend(self.middlewares);

        let mut composer = SchemaComposer::new(self.local)
            .id_transform(self.id_transform)
            .middleware(Arc::new(chain));
        for remote in self.remotes {
            composer = composer.remote(remote);
        }

        let mut mux = ServeMux::new(SchemaHandle::new(composer), loaders);
        mux.set_environment(self.environment);
        if let Some(handler) = self.error_handler {
            mux.set_error_handler_arc(handler);
        }

        Ok(Gateway { mux })
    }

    /// Build and start the gateway server
    pub async fn serve(self, addr: impl Into<String>) -> Result<()> {
        let gateway = self.build()?;
        let composed = gateway.schema().await?;
        if let Some(reason) = composed.degraded() {
            tracing::warn!(reason, "serving the local schema only");
        }

        let addr = addr.into();
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!("Gateway server listening on {}", addr);

        let app = gateway.into_router();
        axum::serve(listener, app).await?;

        Ok(())
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

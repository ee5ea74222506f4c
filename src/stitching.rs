//! Schema stitching
//!
//! [`SchemaComposer`] combines the gateway's local schema with the schemas of
//! its remote services. Remote schemas are introspected, merged behind the
//! local one in declaration order, extended with each service's extension
//! documents and passed through the identifier transform. Extension fields
//! are resolved either locally or by calling a root field of another service
//! ([`StitchingResolver`]).
//!
//! When a remote service cannot be introspected the composer logs the failure
//! and serves the local schema alone. Naming conflicts are not recoverable
//! and fail composition.

use crate::error::{Error, Result};
use crate::id_transform::IdTransform;
use crate::introspection::introspect;
use crate::link::{HttpLink, Link, RemoteExecutor};
use crate::middleware::{default_chain, MiddlewareChain};
use crate::plan::{MergePlan, SchemaFragment, SourceId};
use crate::schema::{
    resolver, DynamicSchema, LocalResolver, ResolverMap, SchemaBuilder, StitchArgs, StitchedField,
};
use crate::types::OperationKind;
use async_graphql::dynamic::{FieldFuture, ResolverContext};
use async_graphql::indexmap::IndexMap;
use async_graphql::{Name, Value as GqlValue};
use futures::future::try_join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// The gateway's own schema: SDL plus resolvers keyed by `(type, field)`
#[derive(Clone, Default)]
pub struct LocalSchema {
    sdl: String,
    resolvers: HashMap<(String, String), LocalResolver>,
}

impl LocalSchema {
    pub fn new(sdl: impl Into<String>) -> Self {
        Self {
            sdl: sdl.into(),
            resolvers: HashMap::new(),
        }
    }

    pub fn resolver<F>(mut self, type_name: &str, field: &str, f: F) -> Self
    where
        F: for<'a> Fn(ResolverContext<'a>) -> FieldFuture<'a> + Send + Sync + 'static,
    {
        self.resolvers
            .insert((type_name.to_string(), field.to_string()), resolver(f));
        self
    }

    pub fn sdl(&self) -> &str {
        &self.sdl
    }
}

/// Resolves an extension field by calling a root field of a remote service
#[derive(Clone)]
pub struct StitchingResolver {
    service: String,
    root_field: String,
    operation: OperationKind,
    fragment: Vec<String>,
    args: StitchArgs,
}

impl StitchingResolver {
    /// Call `root_field` on `service`. Without [`args`](Self::args) the
    /// extension field's own arguments are passed through.
    pub fn new(service: impl Into<String>, root_field: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            root_field: root_field.into(),
            operation: OperationKind::Query,
            fragment: Vec::new(),
            args: Arc::new(
                |_parent: &IndexMap<Name, GqlValue>, args: &IndexMap<Name, GqlValue>| args.clone(),
            ),
        }
    }

    pub fn mutation(mut self) -> Self {
        self.operation = OperationKind::Mutation;
        self
    }

    /// Parent fields to fetch alongside the parent, e.g. `["internalID"]`
    pub fn fragment(mut self, fields: &[&str]) -> Self {
        self.fragment = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn args<F>(mut self, f: F) -> Self
    where
        F: Fn(&IndexMap<Name, GqlValue>, &IndexMap<Name, GqlValue>) -> IndexMap<Name, GqlValue>
            + Send
            + Sync
            + 'static,
    {
        self.args = Arc::new(f);
        self
    }
}

impl std::fmt::Debug for StitchingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StitchingResolver")
            .field("service", &self.service)
            .field("root_field", &self.root_field)
            .field("operation", &self.operation)
            .field("fragment", &self.fragment)
            .finish()
    }
}

/// How an extension field is resolved
#[derive(Clone)]
pub enum ExtensionResolver {
    Local {
        resolver: LocalResolver,
        requires: Vec<String>,
    },
    Delegate(StitchingResolver),
}

/// A remote GraphQL service and the glue that ties it into the gateway
#[derive(Clone)]
pub struct RemoteService {
    name: String,
    link: Arc<dyn Link>,
    requires_auth: bool,
    timeout: Option<Duration>,
    extensions: Vec<String>,
    resolvers: Vec<(String, String, ExtensionResolver)>,
}

impl RemoteService {
    /// Service reached over HTTP at `endpoint`
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::with_link(name, Arc::new(HttpLink::new(endpoint)))
    }

    pub fn with_link(name: impl Into<String>, link: Arc<dyn Link>) -> Self {
        Self {
            name: name.into(),
            link,
            requires_auth: false,
            timeout: None,
            extensions: Vec::new(),
            resolvers: Vec::new(),
        }
    }

    /// Send the caller's token with every delegated call
    pub fn requires_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Extension SDL applied after the merge
    pub fn extension(mut self, sdl: impl Into<String>) -> Self {
        self.extensions.push(sdl.into());
        self
    }

    pub fn delegate(mut self, type_name: &str, field: &str, stitch: StitchingResolver) -> Self {
        self.resolvers.push((
            type_name.to_string(),
            field.to_string(),
            ExtensionResolver::Delegate(stitch),
        ));
        self
    }

    pub fn resolve_locally<F>(mut self, type_name: &str, field: &str, requires: &[&str], f: F) -> Self
    where
        F: for<'a> Fn(ResolverContext<'a>) -> FieldFuture<'a> + Send + Sync + 'static,
    {
        self.resolvers.push((
            type_name.to_string(),
            field.to_string(),
            ExtensionResolver::Local {
                resolver: resolver(f),
                requires: requires.iter().map(|r| r.to_string()).collect(),
            },
        ));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn executor(&self, middleware: &MiddlewareChain) -> RemoteExecutor {
        let executor = RemoteExecutor::new(
            self.name.clone(),
            self.link.clone(),
            self.requires_auth,
            middleware.clone(),
        );
        match self.timeout {
            Some(timeout) => executor.with_timeout(timeout),
            None => executor,
        }
    }
}

impl std::fmt::Debug for RemoteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteService")
            .field("name", &self.name)
            .field("requires_auth", &self.requires_auth)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

/// Lifecycle of schema composition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionState {
    Idle,
    Introspecting,
    Merging,
    Ready,
}

/// A composed, executable schema
#[derive(Clone)]
pub struct ComposedSchema {
    schema: DynamicSchema,
    plan: Arc<MergePlan>,
    degraded: Option<String>,
}

impl ComposedSchema {
    pub fn schema(&self) -> &DynamicSchema {
        &self.schema
    }

    pub fn plan(&self) -> &MergePlan {
        &self.plan
    }

    /// Why remote services are missing, when serving the local schema alone
    pub fn degraded(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    pub fn type_names(&self) -> BTreeSet<String> {
        self.plan.type_names()
    }
}

impl std::fmt::Debug for ComposedSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedSchema")
            .field("types", &self.plan.type_names().len())
            .field("degraded", &self.degraded)
            .finish()
    }
}

pub struct SchemaComposer {
    local: LocalSchema,
    remotes: Vec<RemoteService>,
    id_transform: IdTransform,
    middleware: MiddlewareChain,
    state: CompositionState,
}

impl SchemaComposer {
    pub fn new(local: LocalSchema) -> Self {
        Self {
            local,
            remotes: Vec::new(),
            id_transform: IdTransform::default(),
            middleware: default_chain(),
            state: CompositionState::Idle,
        }
    }

    /// Add a remote service. Later services win type-name collisions.
    pub fn remote(mut self, service: RemoteService) -> Self {
        self.remotes.push(service);
        self
    }

    pub fn id_transform(mut self, transform: IdTransform) -> Self {
        self.id_transform = transform;
        self
    }

    pub fn middleware(mut self, chain: MiddlewareChain) -> Self {
        self.middleware = chain;
        self
    }

    pub fn state(&self) -> CompositionState {
        self.state
    }

    /// Build the gateway schema.
    ///
    /// Remote failures degrade to the local schema; naming conflicts and an
    /// invalid local schema are returned as errors.
    pub async fn compose(&mut self) -> Result<ComposedSchema> {
        match self.try_compose().await {
            Ok(composed) => {
                self.transition(CompositionState::Ready);
                tracing::info!(
                    types = composed.plan.type_names().len(),
                    remotes = self.remotes.len(),
                    "schema composed"
                );
                Ok(composed)
            }
            Err(err @ Error::NamingConflict { .. }) => {
                self.transition(CompositionState::Idle);
                Err(err)
            }
            Err(err) => {
                tracing::error!(error = %err, "schema composition failed, serving local schema only");
                self.transition(CompositionState::Idle);
                self.compose_local(Some(err.to_string()))
            }
        }
    }

    async fn try_compose(&mut self) -> Result<ComposedSchema> {
        self.transition(CompositionState::Introspecting);
        let local = SchemaFragment::from_sdl(SourceId::Local, &self.local.sdl)?;
        let executors: Arc<Vec<RemoteExecutor>> = Arc::new(
            self.remotes
                .iter()
                .map(|remote| remote.executor(&self.middleware))
                .collect(),
        );
        let remote_fragments = try_join_all(
            executors
                .iter()
                .enumerate()
                .map(|(index, executor)| introspect(executor, SourceId::Remote(index))),
        )
        .await?;

        self.transition(CompositionState::Merging);
        let mut fragments = vec![local];
        fragments.extend(remote_fragments);
        let mut plan = MergePlan::merge(fragments)?;
        for (index, remote) in self.remotes.iter().enumerate() {
            for sdl in &remote.extensions {
                plan.extend(SourceId::Glue(index), sdl)?;
            }
        }
        plan.validate()?;
        self.id_transform.apply(&mut plan)?;

        let mut resolvers = ResolverMap {
            local: self.local.resolvers.clone(),
            ..ResolverMap::default()
        };
        for remote in &self.remotes {
            for (type_name, field, extension) in &remote.resolvers {
                let key = (type_name.clone(), field.clone());
                match extension {
                    ExtensionResolver::Local { resolver, requires } => {
                        plan.set_requires(type_name, field, requires)?;
                        resolvers.local.insert(key, resolver.clone());
                    }
                    ExtensionResolver::Delegate(stitch) => {
                        let service = self
                            .remotes
                            .iter()
                            .position(|r| r.name == stitch.service)
                            .ok_or_else(|| {
                                Error::Composition(format!(
                                    "{type_name}.{field} delegates to unknown service {}",
                                    stitch.service
                                ))
                            })?;
                        plan.set_requires(type_name, field, &stitch.fragment)?;
                        resolvers.stitched.insert(
                            key,
                            StitchedField {
                                service,
                                root_field: stitch.root_field.clone(),
                                operation: stitch.operation,
                                args: stitch.args.clone(),
                            },
                        );
                    }
                }
            }
        }

        let plan = Arc::new(plan);
        let schema = SchemaBuilder::new(plan.clone())
            .executors(executors)
            .resolvers(resolvers)
            .build()?;

        Ok(ComposedSchema {
            schema,
            plan,
            degraded: None,
        })
    }

    fn compose_local(&self, degraded: Option<String>) -> Result<ComposedSchema> {
        let mut plan = MergePlan::merge(vec![SchemaFragment::from_sdl(
            SourceId::Local,
            &self.local.sdl,
        )?])?;
        plan.validate()?;
        self.id_transform.apply(&mut plan)?;

        let plan = Arc::new(plan);
        let schema = SchemaBuilder::new(plan.clone())
            .resolvers(ResolverMap {
                local: self.local.resolvers.clone(),
                ..ResolverMap::default()
            })
            .build()?;

        Ok(ComposedSchema {
            schema,
            plan,
            degraded,
        })
    }

    fn transition(&mut self, next: CompositionState) {
        tracing::debug!(from = ?self.state, to = ?next, "composition state changed");
        self.state = next;
    }
}

//! Executable schema built from a [`MergePlan`].
//!
//! Every field of the plan gets one resolver, picked in this order:
//!
//! 1. a local resolver registered for `Type.field`,
//! 2. a stitched resolver calling a root field of another service,
//! 3. for root fields owned by a remote service, a delegating resolver that
//!    sends the client's selection to that service,
//! 4. a property resolver reading the field from the parent value.
//!
//! Values that came back from a remote service are wrapped in [`Delegated`]
//! so their children are read by response key rather than field name.

use crate::context::RequestScope;
use crate::delegation::{dependency_key, SubqueryBuilder, STITCHED_KEY};
use crate::error::{Error, Result};
use crate::link::RemoteExecutor;
use crate::plan::{is_builtin_scalar, FieldDef, InputValueDef, MergePlan, SourceId, TypeDef, TypeDefKind, TypeRefDef};
use crate::types::{OperationKind, RemoteError};
use async_graphql::dynamic::{
    Enum, EnumItem, Field, FieldFuture, FieldValue, InputObject, InputValue, Interface,
    InterfaceField, Object, ResolverContext, Scalar, Schema as AsyncSchema, TypeRef, Union,
};
use async_graphql::indexmap::IndexMap;
use async_graphql::{
    ErrorExtensionValues, Name, PathSegment, QueryPathSegment, ServerError, Value as GqlValue,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolver supplied by the gateway's own code
pub type LocalResolver =
    Arc<dyn for<'a> Fn(ResolverContext<'a>) -> FieldFuture<'a> + Send + Sync>;

/// Wrap a closure as a [`LocalResolver`]
pub fn resolver<F>(f: F) -> LocalResolver
where
    F: for<'a> Fn(ResolverContext<'a>) -> FieldFuture<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Builds the arguments of a stitched call from the parent object and the
/// field's own arguments
pub type StitchArgs = Arc<
    dyn Fn(&IndexMap<Name, GqlValue>, &IndexMap<Name, GqlValue>) -> IndexMap<Name, GqlValue>
        + Send
        + Sync,
>;

/// Dynamic schema wrapper
#[derive(Clone)]
pub struct DynamicSchema {
    inner: AsyncSchema,
}

impl DynamicSchema {
    /// Execute a GraphQL request
    pub async fn execute(&self, request: async_graphql::Request) -> async_graphql::Response {
        self.inner.execute(request).await
    }

    /// Access the executor (used for HTTP integration)
    pub fn executor(&self) -> AsyncSchema {
        self.inner.clone()
    }

    pub fn sdl(&self) -> String {
        self.inner.sdl()
    }
}

/// A parent value returned by a remote service
#[derive(Debug, Clone)]
pub struct Delegated(pub GqlValue);

/// Runtime form of a stitched field
#[derive(Clone)]
pub(crate) struct StitchedField {
    pub service: usize,
    pub root_field: String,
    pub operation: OperationKind,
    pub args: StitchArgs,
}

/// Resolvers keyed by `(type, field)` in merged-schema names
#[derive(Clone, Default)]
pub(crate) struct ResolverMap {
    pub local: HashMap<(String, String), LocalResolver>,
    pub stitched: HashMap<(String, String), StitchedField>,
}

impl ResolverMap {
    fn local_for(&self, ty: &TypeDef, field: &FieldDef) -> Option<&LocalResolver> {
        self.local
            .get(&(ty.name.clone(), field.name.clone()))
            .or_else(|| self.local.get(&(ty.name.clone(), field.source_name.clone())))
    }
}

/// Schema builder for the composed gateway schema
pub(crate) struct SchemaBuilder {
    plan: Arc<MergePlan>,
    executors: Arc<Vec<RemoteExecutor>>,
    resolvers: ResolverMap,
}

impl SchemaBuilder {
    pub fn new(plan: Arc<MergePlan>) -> Self {
        Self {
            plan,
            executors: Arc::new(Vec::new()),
            resolvers: ResolverMap::default(),
        }
    }

    pub fn executors(mut self, executors: Arc<Vec<RemoteExecutor>>) -> Self {
        self.executors = executors;
        self
    }

    pub fn resolvers(mut self, resolvers: ResolverMap) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn build(self) -> Result<DynamicSchema> {
        let has_mutation = self.plan.has_mutation();
        let mut schema_builder =
            AsyncSchema::build("Query", has_mutation.then_some("Mutation"), None);
        let mut has_query = false;

        for ty in self.plan.types() {
            if is_builtin_scalar(&ty.name) {
                continue;
            }
            match &ty.kind {
                TypeDefKind::Object { implements, fields } => {
                    if fields.is_empty() {
                        tracing::warn!(type_name = %ty.name, "skipping object type without fields");
                        continue;
                    }
                    let mut object = Object::new(ty.name.clone());
                    if let Some(description) = &ty.description {
                        object = object.description(description.clone());
                    }
                    for interface in implements {
                        object = object.implement(interface.clone());
                    }
                    for field in fields.values() {
                        object = object.field(self.build_field(ty, field)?);
                    }
                    has_query |= ty.name == "Query";
                    schema_builder = schema_builder.register(object);
                }
                TypeDefKind::Interface { implements, fields } => {
                    let mut interface = Interface::new(ty.name.clone());
                    for parent in implements {
                        interface = interface.implement(parent.clone());
                    }
                    for field in fields.values() {
                        let mut interface_field =
                            InterfaceField::new(field.name.clone(), field.ty.to_dynamic());
                        if let Some(description) = &field.description {
                            interface_field = interface_field.description(description.clone());
                        }
                        for arg in &field.args {
                            interface_field = interface_field.argument(input_value(arg));
                        }
                        interface = interface.field(interface_field);
                    }
                    schema_builder = schema_builder.register(interface);
                }
                TypeDefKind::Union { members } => {
                    let mut union = Union::new(ty.name.clone());
                    for member in members {
                        union = union.possible_type(member.clone());
                    }
                    schema_builder = schema_builder.register(union);
                }
                TypeDefKind::Enum { values } => {
                    let mut en = Enum::new(ty.name.clone());
                    for value in values {
                        en = en.item(EnumItem::new(value.clone()));
                    }
                    schema_builder = schema_builder.register(en);
                }
                TypeDefKind::InputObject { fields } => {
                    let mut input = InputObject::new(ty.name.clone());
                    for field in fields {
                        input = input.field(input_value(field));
                    }
                    schema_builder = schema_builder.register(input);
                }
                TypeDefKind::Scalar => {
                    schema_builder = schema_builder.register(Scalar::new(ty.name.clone()));
                }
            }
        }

        if !has_query {
            schema_builder = schema_builder.register(placeholder_query_root());
        }

        let schema = schema_builder
            .finish()
            .map_err(|e| Error::Schema(format!("failed to build schema: {e}")))?;

        Ok(DynamicSchema { inner: schema })
    }

    fn build_field(&self, ty: &TypeDef, def: &FieldDef) -> Result<Field> {
        let key = (ty.name.clone(), def.name.clone());
        let mut field = if let Some(resolver) = self.resolvers.local_for(ty, def) {
            let resolver = resolver.clone();
            Field::new(def.name.clone(), def.ty.to_dynamic(), move |ctx| resolver(ctx))
        } else if let Some(stitched) = self.resolvers.stitched.get(&key) {
            self.stitched_field(ty, def, stitched.clone())?
        } else if let (Some(kind), SourceId::Remote(index)) = (root_kind(&ty.name), def.origin) {
            self.delegated_root_field(def, kind, index)?
        } else {
            self.property_field(def)
        };

        if let Some(description) = &def.description {
            field = field.description(description.clone());
        }
        for arg in &def.args {
            field = field.argument(input_value(arg));
        }
        Ok(field)
    }

    fn executor(&self, index: usize) -> Result<RemoteExecutor> {
        self.executors
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Schema(format!("no remote service at index {index}")))
    }

    fn property_field(&self, def: &FieldDef) -> Field {
        let plan = self.plan.clone();
        let names = Arc::new((def.name.clone(), def.source_name.clone(), def.ty.clone()));

        Field::new(def.name.clone(), def.ty.to_dynamic(), move |ctx| {
            let plan = plan.clone();
            let names = names.clone();
            FieldFuture::new(async move {
                let (public, source, ty) = &*names;
                if let Some(Delegated(parent)) = ctx.parent_value.downcast_ref::<Delegated>() {
                    let field = ctx.field();
                    let value = object_member(parent, field.alias().unwrap_or(field.name()));
                    return Ok(value.and_then(|v| resolve_value(v, ty, &plan, true)));
                }
                let value = ctx
                    .parent_value
                    .as_value()
                    .and_then(|parent| object_member(parent, public).or_else(|| object_member(parent, source)));
                Ok(value.and_then(|v| resolve_value(v, ty, &plan, false)))
            })
        })
    }

    fn delegated_root_field(&self, def: &FieldDef, kind: OperationKind, index: usize) -> Result<Field> {
        let executor = self.executor(index)?;
        let plan = self.plan.clone();
        let ty = def.ty.clone();

        Ok(Field::new(def.name.clone(), def.ty.to_dynamic(), move |ctx| {
            let executor = executor.clone();
            let plan = plan.clone();
            let ty = ty.clone();
            FieldFuture::new(async move {
                let selection = ctx.field();
                let request = SubqueryBuilder::new(&plan, SourceId::Remote(index))
                    .root_field(kind, &selection)
                    .map_err(Error::into_field_error)?;
                let (data, errors) = executor
                    .execute_partial(request, ctx.data_opt::<RequestScope>())
                    .await
                    .map_err(Error::into_field_error)?;
                report_remote_errors(&ctx, executor.name(), errors);
                let value = json_member(&data, selection.alias().unwrap_or(selection.name()))?;
                Ok(resolve_value(value, &ty, &plan, true))
            })
        }))
    }

    fn stitched_field(&self, parent: &TypeDef, def: &FieldDef, stitched: StitchedField) -> Result<Field> {
        let executor = self.executor(stitched.service)?;
        let plan = self.plan.clone();
        let parent_type = Arc::new(parent.name.clone());
        let ty = def.ty.clone();
        let requires = Arc::new(def.requires.clone());
        let stitched = Arc::new(stitched);

        Ok(Field::new(def.name.clone(), def.ty.to_dynamic(), move |ctx| {
            let executor = executor.clone();
            let plan = plan.clone();
            let ty = ty.clone();
            let requires = requires.clone();
            let stitched = stitched.clone();
            let parent_type = parent_type.clone();
            FieldFuture::new(async move {
                let parent = stitch_parent(&ctx, &plan, &parent_type, &requires);
                let args = (stitched.args)(&parent, ctx.args.as_index_map());
                let selection = ctx.field();
                let request = SubqueryBuilder::new(&plan, SourceId::Remote(stitched.service))
                    .stitched_field(stitched.operation, &stitched.root_field, &args, &selection, &ty)
                    .map_err(Error::into_field_error)?;
                let (data, errors) = executor
                    .execute_partial(request, ctx.data_opt::<RequestScope>())
                    .await
                    .map_err(Error::into_field_error)?;
                report_remote_errors(&ctx, executor.name(), errors);
                let value = json_member(&data, STITCHED_KEY)?;
                Ok(resolve_value(value, &ty, &plan, true))
            })
        }))
    }
}

fn root_kind(type_name: &str) -> Option<OperationKind> {
    match type_name {
        "Query" => Some(OperationKind::Query),
        "Mutation" => Some(OperationKind::Mutation),
        _ => None,
    }
}

fn input_value(def: &InputValueDef) -> InputValue {
    let mut value = InputValue::new(def.name.clone(), def.ty.to_dynamic());
    if let Some(description) = &def.description {
        value = value.description(description.clone());
    }
    if let Some(default) = &def.default_value {
        value = value.default_value(default.clone());
    }
    value
}

fn object_member(value: &GqlValue, key: &str) -> Option<GqlValue> {
    match value {
        GqlValue::Object(map) => map.get(key).cloned(),
        _ => None,
    }
}

fn json_member(data: &serde_json::Value, key: &str) -> async_graphql::Result<GqlValue> {
    let value = data.get(key).cloned().unwrap_or(serde_json::Value::Null);
    GqlValue::from_json(value).map_err(|e| async_graphql::Error::new(e.to_string()))
}

/// The parent object of a resolver, whether it was produced locally or by a
/// remote service.
pub fn parent_object<'c>(ctx: &'c ResolverContext<'_>) -> Option<&'c IndexMap<Name, GqlValue>> {
    let value = match ctx.parent_value.downcast_ref::<Delegated>() {
        Some(Delegated(value)) => value,
        None => ctx.parent_value.as_value()?,
    };
    match value {
        GqlValue::Object(map) => Some(map),
        _ => None,
    }
}

/// Parent object with the fields a stitched resolver needs exposed under
/// their merged names. Remote parents carry them under dependency keys, local
/// parents under the merged or the source name.
fn stitch_parent(
    ctx: &ResolverContext<'_>,
    plan: &MergePlan,
    type_name: &str,
    requires: &[String],
) -> IndexMap<Name, GqlValue> {
    let delegated = ctx.parent_value.downcast_ref::<Delegated>().is_some();
    let mut parent = parent_object(ctx).cloned().unwrap_or_default();
    for name in requires {
        let value = if delegated {
            parent.get(dependency_key(name).as_str()).cloned()
        } else {
            parent.get(name.as_str()).cloned().or_else(|| {
                plan.get(type_name)
                    .and_then(|ty| ty.field(name))
                    .and_then(|field| parent.get(field.source_name.as_str()).cloned())
            })
        };
        if let Some(value) = value {
            parent.insert(Name::new(name), value);
        }
    }
    parent
}

/// Re-emit errors a remote service reported next to its data, at the path
/// they have in the gateway response.
fn report_remote_errors(ctx: &ResolverContext<'_>, service: &str, errors: Vec<RemoteError>) {
    if errors.is_empty() {
        return;
    }
    let mut base = Vec::new();
    let mut node = ctx.path_node.as_ref();
    while let Some(current) = node {
        base.push(match &current.segment {
            QueryPathSegment::Name(name) => PathSegment::Field(name.to_string()),
            QueryPathSegment::Index(index) => PathSegment::Index(*index),
        });
        node = current.parent;
    }
    base.reverse();

    for error in errors {
        let mut server_error = ServerError::new(error.message, None);
        server_error.path = base.clone();
        // the first segment is the delegated field's own key
        for segment in error.path.iter().flatten().skip(1) {
            match segment {
                serde_json::Value::String(name) => {
                    server_error.path.push(PathSegment::Field(name.clone()))
                }
                serde_json::Value::Number(index) => {
                    if let Some(index) = index.as_u64() {
                        server_error.path.push(PathSegment::Index(index as usize));
                    }
                }
                _ => {}
            }
        }

        let mut extensions = ErrorExtensionValues::default();
        if let Some(serde_json::Value::Object(remote)) = error.extensions {
            for (key, value) in remote {
                if let Ok(value) = GqlValue::from_json(value) {
                    extensions.set(key, value);
                }
            }
        }
        extensions.set("service", GqlValue::String(service.to_string()));
        server_error.extensions = Some(extensions);
        ctx.add_error(server_error);
    }
}

/// Turn a value into what the dynamic executor expects for `ty`: lists are
/// split into items, enum strings become enum values and objects of abstract
/// types are tagged with their concrete type.
fn resolve_value<'a>(
    value: GqlValue,
    ty: &TypeRefDef,
    plan: &MergePlan,
    delegated: bool,
) -> Option<FieldValue<'a>> {
    match value {
        GqlValue::Null => None,
        GqlValue::List(items) if ty.is_list() => {
            let item_ty = ty.list_item();
            Some(FieldValue::list(items.into_iter().map(|item| {
                resolve_value(item, item_ty, plan, delegated)
                    .unwrap_or_else(|| FieldValue::value(GqlValue::Null))
            })))
        }
        GqlValue::String(s) if plan.is_enum(ty.named_type()) => {
            Some(FieldValue::value(GqlValue::Enum(Name::new(s))))
        }
        value if plan.is_composite(ty.named_type()) => {
            let concrete = if plan.is_abstract(ty.named_type()) {
                match object_member(&value, "__typename") {
                    Some(GqlValue::String(name)) => Some(name),
                    _ => None,
                }
            } else {
                None
            };
            let field_value = if delegated {
                FieldValue::owned_any(Delegated(value))
            } else {
                FieldValue::value(value)
            };
            Some(match concrete {
                Some(name) => field_value.with_type(name),
                None => field_value,
            })
        }
        value => Some(FieldValue::value(value)),
    }
}

fn placeholder_query_root() -> Object {
    let ty = TypeRef::NonNull(Box::new(TypeRef::named(TypeRef::BOOLEAN)));
    let field = Field::new("__placeholder", ty, |_| {
        FieldFuture::new(async { Ok(Some(GqlValue::Boolean(true))) })
    });
    Object::new("Query").field(field)
}

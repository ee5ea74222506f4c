//! Merge plan: the intermediate model every schema source is converted into
//!
//! Local SDL, introspected remote schemas and extension documents all become
//! [`SchemaFragment`]s. [`MergePlan::merge`] folds them in precedence order
//! into one type map in which every field remembers which source owns it and
//! the name it has there. The executable schema is built from the finished
//! plan; the plan itself is never mutated once composition is done.

use crate::error::{Error, Result};
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::types::{
    BaseType, FieldDefinition, InputValueDefinition, ServiceDocument, Type as AstType,
    TypeDefinition, TypeKind, TypeSystemDefinition,
};
use async_graphql::Value as GqlValue;
use std::collections::BTreeSet;

/// Scalars every GraphQL schema has
pub const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

pub fn is_builtin_scalar(name: &str) -> bool {
    BUILTIN_SCALARS.contains(&name)
}

/// Where a type or field comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceId {
    /// The gateway's own schema
    Local,
    /// The n-th configured remote service
    Remote(usize),
    /// Extension documents shipped with the n-th remote service
    Glue(usize),
}

/// Type reference (`[Artist!]!` and friends)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRefDef {
    Named(String),
    NonNull(Box<TypeRefDef>),
    List(Box<TypeRefDef>),
}

impl TypeRefDef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRefDef::Named(name.into())
    }

    /// Innermost named type
    pub fn named_type(&self) -> &str {
        match self {
            TypeRefDef::Named(name) => name,
            TypeRefDef::NonNull(inner) | TypeRefDef::List(inner) => inner.named_type(),
        }
    }

    /// Whether the outermost nullable layer is a list
    pub fn is_list(&self) -> bool {
        match self {
            TypeRefDef::List(_) => true,
            TypeRefDef::NonNull(inner) => inner.is_list(),
            TypeRefDef::Named(_) => false,
        }
    }

    /// Element type of a list reference; the reference itself otherwise
    pub fn list_item(&self) -> &TypeRefDef {
        match self {
            TypeRefDef::List(inner) => inner,
            TypeRefDef::NonNull(inner) => inner.list_item(),
            TypeRefDef::Named(_) => self,
        }
    }

    pub fn to_dynamic(&self) -> async_graphql::dynamic::TypeRef {
        use async_graphql::dynamic::TypeRef;
        match self {
            TypeRefDef::Named(name) => TypeRef::named(name.clone()),
            TypeRefDef::NonNull(inner) => TypeRef::NonNull(Box::new(inner.to_dynamic())),
            TypeRefDef::List(inner) => TypeRef::List(Box::new(inner.to_dynamic())),
        }
    }

    fn from_ast(ty: &AstType) -> Self {
        let base = match &ty.base {
            BaseType::Named(name) => TypeRefDef::Named(name.to_string()),
            BaseType::List(inner) => TypeRefDef::List(Box::new(Self::from_ast(inner))),
        };
        if ty.nullable {
            base
        } else {
            TypeRefDef::NonNull(Box::new(base))
        }
    }

    fn rename(&mut self, from: &str, to: &str) {
        match self {
            TypeRefDef::Named(name) if name == from => *name = to.to_string(),
            TypeRefDef::Named(_) => {}
            TypeRefDef::NonNull(inner) | TypeRefDef::List(inner) => inner.rename(from, to),
        }
    }
}

/// Argument or input field
#[derive(Debug, Clone, PartialEq)]
pub struct InputValueDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRefDef,
    pub default_value: Option<GqlValue>,
}

impl InputValueDef {
    fn from_ast(def: &InputValueDefinition) -> Self {
        Self {
            name: def.name.node.to_string(),
            description: def.description.as_ref().map(|d| d.node.clone()),
            ty: TypeRefDef::from_ast(&def.ty.node),
            default_value: def.default_value.as_ref().map(|v| v.node.clone()),
        }
    }
}

/// Output field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Name in the merged schema
    pub name: String,
    /// Name in the owning source (differs after the ID transform)
    pub source_name: String,
    pub description: Option<String>,
    pub args: Vec<InputValueDef>,
    pub ty: TypeRefDef,
    pub origin: SourceId,
    /// Fields of the parent this field needs fetched before it can resolve
    pub requires: Vec<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRefDef, origin: SourceId) -> Self {
        let name = name.into();
        Self {
            source_name: name.clone(),
            name,
            description: None,
            args: Vec::new(),
            ty,
            origin,
            requires: Vec::new(),
        }
    }

    fn from_ast(def: &FieldDefinition, origin: SourceId) -> Self {
        let name = def.name.node.to_string();
        Self {
            source_name: name.clone(),
            name,
            description: def.description.as_ref().map(|d| d.node.clone()),
            args: def
                .arguments
                .iter()
                .map(|arg| InputValueDef::from_ast(&arg.node))
                .collect(),
            ty: TypeRefDef::from_ast(&def.ty.node),
            origin,
            requires: Vec::new(),
        }
    }

    pub fn arg(&self, name: &str) -> Option<&InputValueDef> {
        self.args.iter().find(|arg| arg.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDefKind {
    Object {
        implements: Vec<String>,
        fields: IndexMap<String, FieldDef>,
    },
    Interface {
        implements: Vec<String>,
        fields: IndexMap<String, FieldDef>,
    },
    Union {
        members: Vec<String>,
    },
    Enum {
        values: Vec<String>,
    },
    InputObject {
        fields: Vec<InputValueDef>,
    },
    Scalar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub description: Option<String>,
    pub kind: TypeDefKind,
    pub source: SourceId,
}

impl TypeDef {
    pub fn fields(&self) -> Option<&IndexMap<String, FieldDef>> {
        match &self.kind {
            TypeDefKind::Object { fields, .. } | TypeDefKind::Interface { fields, .. } => {
                Some(fields)
            }
            _ => None,
        }
    }

    pub fn fields_mut(&mut self) -> Option<&mut IndexMap<String, FieldDef>> {
        match &mut self.kind {
            TypeDefKind::Object { fields, .. } | TypeDefKind::Interface { fields, .. } => {
                Some(fields)
            }
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields().and_then(|fields| fields.get(name))
    }

    pub fn implements(&self) -> &[String] {
        match &self.kind {
            TypeDefKind::Object { implements, .. } | TypeDefKind::Interface { implements, .. } => {
                implements
            }
            _ => &[],
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self.kind, TypeDefKind::Object { .. })
    }

    pub fn is_abstract(&self) -> bool {
        matches!(
            self.kind,
            TypeDefKind::Interface { .. } | TypeDefKind::Union { .. }
        )
    }

    pub fn is_composite(&self) -> bool {
        self.fields().is_some() || matches!(self.kind, TypeDefKind::Union { .. })
    }

    fn from_ast(def: &TypeDefinition, source: SourceId) -> Self {
        let kind = match &def.kind {
            TypeKind::Scalar => TypeDefKind::Scalar,
            TypeKind::Object(object) => TypeDefKind::Object {
                implements: object.implements.iter().map(|n| n.node.to_string()).collect(),
                fields: fields_from_ast(&object.fields, source),
            },
            TypeKind::Interface(interface) => TypeDefKind::Interface {
                implements: interface
                    .implements
                    .iter()
                    .map(|n| n.node.to_string())
                    .collect(),
                fields: fields_from_ast(&interface.fields, source),
            },
            TypeKind::Union(union) => TypeDefKind::Union {
                members: union.members.iter().map(|n| n.node.to_string()).collect(),
            },
            TypeKind::Enum(en) => TypeDefKind::Enum {
                values: en.values.iter().map(|v| v.node.value.node.to_string()).collect(),
            },
            TypeKind::InputObject(input) => TypeDefKind::InputObject {
                fields: input
                    .fields
                    .iter()
                    .map(|f| InputValueDef::from_ast(&f.node))
                    .collect(),
            },
        };
        Self {
            name: def.name.node.to_string(),
            description: def.description.as_ref().map(|d| d.node.clone()),
            kind,
            source,
        }
    }

    /// Merge the members of an `extend` definition into this type
    fn absorb(&mut self, extension: TypeDef, collisions: &mut Vec<Collision>) -> Result<()> {
        let type_name = self.name.clone();
        match (&mut self.kind, extension.kind) {
            (
                TypeDefKind::Object { implements, fields },
                TypeDefKind::Object {
                    implements: more,
                    fields: added,
                },
            )
            | (
                TypeDefKind::Interface { implements, fields },
                TypeDefKind::Interface {
                    implements: more,
                    fields: added,
                },
            ) => {
                for name in more {
                    if !implements.contains(&name) {
                        implements.push(name);
                    }
                }
                for (name, field) in added {
                    if let Some(previous) = fields.get(&name) {
                        record_collision(collisions, &type_name, Some(&name), previous.origin, field.origin);
                    }
                    fields.insert(name, field);
                }
            }
            (TypeDefKind::Union { members }, TypeDefKind::Union { members: more }) => {
                for member in more {
                    if !members.contains(&member) {
                        members.push(member);
                    }
                }
            }
            (TypeDefKind::Enum { values }, TypeDefKind::Enum { values: more }) => {
                for value in more {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
            }
            (TypeDefKind::InputObject { fields }, TypeDefKind::InputObject { fields: more }) => {
                for field in more {
                    fields.retain(|f| f.name != field.name);
                    fields.push(field);
                }
            }
            _ => {
                return Err(Error::Composition(format!(
                    "extension of {type_name} does not match its kind"
                )))
            }
        }
        Ok(())
    }

    fn rename_references(&mut self, from: &str, to: &str) {
        if self.name == from {
            self.name = to.to_string();
        }
        match &mut self.kind {
            TypeDefKind::Object { implements, fields }
            | TypeDefKind::Interface { implements, fields } => {
                for name in implements.iter_mut() {
                    if name == from {
                        *name = to.to_string();
                    }
                }
                for field in fields.values_mut() {
                    field.ty.rename(from, to);
                    for arg in &mut field.args {
                        arg.ty.rename(from, to);
                    }
                }
            }
            TypeDefKind::Union { members } => {
                for name in members.iter_mut() {
                    if name == from {
                        *name = to.to_string();
                    }
                }
            }
            TypeDefKind::InputObject { fields } => {
                for field in fields {
                    field.ty.rename(from, to);
                }
            }
            TypeDefKind::Enum { .. } | TypeDefKind::Scalar => {}
        }
    }
}

fn fields_from_ast(
    defs: &[async_graphql::Positioned<FieldDefinition>],
    source: SourceId,
) -> IndexMap<String, FieldDef> {
    defs.iter()
        .map(|def| {
            let field = FieldDef::from_ast(&def.node, source);
            (field.name.clone(), field)
        })
        .collect()
}

/// The types one source contributes, root types already named `Query` and
/// `Mutation`.
#[derive(Debug, Clone)]
pub struct SchemaFragment {
    pub source: SourceId,
    pub types: IndexMap<String, TypeDef>,
}

impl SchemaFragment {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            types: IndexMap::new(),
        }
    }

    /// Parse a schema document. `extend` definitions are folded into the
    /// types of the same document.
    pub fn from_sdl(source: SourceId, sdl: &str) -> Result<Self> {
        let document = parse_sdl(sdl)?;
        let mut fragment = Self::new(source);
        let mut roots = RootNames::default();
        let mut extensions = Vec::new();
        let mut ignored = Vec::new();

        for definition in &document.definitions {
            match definition {
                TypeSystemDefinition::Schema(schema) => roots.read(&schema.node),
                TypeSystemDefinition::Type(def) => {
                    let ty = TypeDef::from_ast(&def.node, source);
                    if def.node.extend {
                        extensions.push(ty);
                    } else {
                        fragment.types.insert(ty.name.clone(), ty);
                    }
                }
                TypeSystemDefinition::Directive(_) => {}
            }
        }

        for extension in extensions {
            let Some(target) = fragment.types.get_mut(&extension.name) else {
                return Err(Error::Composition(format!(
                    "cannot extend unknown type {}",
                    extension.name
                )));
            };
            target.absorb(extension, &mut ignored)?;
        }

        fragment.normalize_roots(&roots);
        Ok(fragment)
    }

    /// Rename the source's root operation types to `Query`/`Mutation`
    pub fn normalize_roots(&mut self, roots: &RootNames) {
        for (custom, canonical) in [
            (roots.query.as_deref(), "Query"),
            (roots.mutation.as_deref(), "Mutation"),
        ] {
            let Some(custom) = custom else { continue };
            if custom == canonical || !self.types.contains_key(custom) {
                continue;
            }
            let types = std::mem::take(&mut self.types);
            self.types = types
                .into_iter()
                .map(|(_, mut ty)| {
                    ty.rename_references(custom, canonical);
                    (ty.name.clone(), ty)
                })
                .collect();
        }
    }
}

/// Root operation type names declared by a source
#[derive(Debug, Clone, Default)]
pub struct RootNames {
    pub query: Option<String>,
    pub mutation: Option<String>,
}

impl RootNames {
    fn read(&mut self, schema: &async_graphql::parser::types::SchemaDefinition) {
        if let Some(query) = &schema.query {
            self.query = Some(query.node.to_string());
        }
        if let Some(mutation) = &schema.mutation {
            self.mutation = Some(mutation.node.to_string());
        }
    }
}

fn parse_sdl(sdl: &str) -> Result<ServiceDocument> {
    async_graphql::parser::parse_schema(sdl)
        .map_err(|e| Error::Composition(format!("invalid schema document: {e}")))
}

/// A type-name (or root field) collision resolved during the merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub type_name: String,
    pub field: Option<String>,
    pub previous: SourceId,
    pub winner: SourceId,
}

fn record_collision(
    collisions: &mut Vec<Collision>,
    type_name: &str,
    field: Option<&str>,
    previous: SourceId,
    winner: SourceId,
) {
    tracing::warn!(
        type_name,
        field,
        previous = ?previous,
        winner = ?winner,
        "type name collision, later-declared source wins"
    );
    collisions.push(Collision {
        type_name: type_name.to_string(),
        field: field.map(String::from),
        previous,
        winner,
    });
}

fn is_root(name: &str) -> bool {
    name == "Query" || name == "Mutation"
}

/// The merged schema: one type map plus the precedence it was built with.
#[derive(Debug, Clone)]
pub struct MergePlan {
    types: IndexMap<String, TypeDef>,
    precedence: Vec<SourceId>,
    collisions: Vec<Collision>,
}

impl MergePlan {
    /// Fold `fragments` together. Fragments are applied in the given order
    /// and a later fragment wins every collision: a whole type for ordinary
    /// types, a single field for `Query` and `Mutation`.
    pub fn merge(fragments: Vec<SchemaFragment>) -> Result<Self> {
        let mut plan = MergePlan {
            types: IndexMap::new(),
            precedence: Vec::with_capacity(fragments.len()),
            collisions: Vec::new(),
        };

        for fragment in fragments {
            plan.precedence.push(fragment.source);
            for (name, ty) in fragment.types {
                plan.insert_type(name, ty)?;
            }
        }

        Ok(plan)
    }

    fn insert_type(&mut self, name: String, ty: TypeDef) -> Result<()> {
        let Some(existing) = self.types.get_mut(&name) else {
            self.types.insert(name, ty);
            return Ok(());
        };

        if is_root(&name) {
            let TypeDefKind::Object { fields: added, .. } = ty.kind else {
                return Err(Error::Composition(format!("{name} must be an object type")));
            };
            let Some(fields) = existing.fields_mut() else {
                return Err(Error::Composition(format!("{name} must be an object type")));
            };
            for (field_name, field) in added {
                if let Some(previous) = fields.get(&field_name) {
                    let previous = previous.origin;
                    record_collision(
                        &mut self.collisions,
                        &name,
                        Some(&field_name),
                        previous,
                        field.origin,
                    );
                }
                fields.insert(field_name, field);
            }
            return Ok(());
        }

        let previous = existing.source;
        let winner = ty.source;
        *existing = ty;
        record_collision(&mut self.collisions, &name, None, previous, winner);
        Ok(())
    }

    /// Apply an extension document owned by `source`: `extend` definitions
    /// add members to merged types, other definitions add (or replace) types.
    pub fn extend(&mut self, source: SourceId, sdl: &str) -> Result<()> {
        let document = parse_sdl(sdl)?;
        if !self.precedence.contains(&source) {
            self.precedence.push(source);
        }

        for definition in &document.definitions {
            let TypeSystemDefinition::Type(def) = definition else {
                continue;
            };
            let ty = TypeDef::from_ast(&def.node, source);
            if def.node.extend {
                let Some(target) = self.types.get_mut(&ty.name) else {
                    return Err(Error::Composition(format!(
                        "extension targets unknown type {}",
                        ty.name
                    )));
                };
                target.absorb(ty, &mut self.collisions)?;
            } else {
                self.insert_type(ty.name.clone(), ty)?;
            }
        }
        Ok(())
    }

    /// Check that every referenced type exists and that interfaces are
    /// implemented with all their fields.
    pub fn validate(&self) -> Result<()> {
        if !self.types.contains_key("Query") {
            return Err(Error::Composition("merged schema has no Query type".into()));
        }

        let known = |name: &str| is_builtin_scalar(name) || self.types.contains_key(name);
        for ty in self.types.values() {
            let missing = |what: &str| {
                Error::Composition(format!("{} references unknown type {what}", ty.name))
            };
            match &ty.kind {
                TypeDefKind::Object { implements, fields }
                | TypeDefKind::Interface { implements, fields } => {
                    for interface in implements {
                        let Some(TypeDef {
                            kind: TypeDefKind::Interface { fields: required, .. },
                            ..
                        }) = self.types.get(interface)
                        else {
                            return Err(missing(interface));
                        };
                        if let Some(absent) = required.keys().find(|f| !fields.contains_key(*f)) {
                            return Err(Error::Composition(format!(
                                "{} implements {interface} but lacks field {absent}",
                                ty.name
                            )));
                        }
                    }
                    for field in fields.values() {
                        if !known(field.ty.named_type()) {
                            return Err(missing(field.ty.named_type()));
                        }
                        for arg in &field.args {
                            if !known(arg.ty.named_type()) {
                                return Err(missing(arg.ty.named_type()));
                            }
                        }
                    }
                }
                TypeDefKind::Union { members } => {
                    if let Some(member) = members.iter().find(|m| !self.types.contains_key(*m)) {
                        return Err(missing(member));
                    }
                }
                TypeDefKind::InputObject { fields } => {
                    if let Some(field) = fields.iter().find(|f| !known(f.ty.named_type())) {
                        return Err(missing(field.ty.named_type()));
                    }
                }
                TypeDefKind::Enum { .. } | TypeDefKind::Scalar => {}
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TypeDef> {
        self.types.get_mut(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    pub(crate) fn types_mut(&mut self) -> impl Iterator<Item = &mut TypeDef> {
        self.types.values_mut()
    }

    /// Names of all types, sorted
    pub fn type_names(&self) -> BTreeSet<String> {
        self.types.keys().cloned().collect()
    }

    pub fn precedence(&self) -> &[SourceId] {
        &self.precedence
    }

    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    pub fn has_mutation(&self) -> bool {
        self.types
            .get("Mutation")
            .and_then(TypeDef::fields)
            .is_some_and(|fields| !fields.is_empty())
    }

    pub fn is_abstract(&self, name: &str) -> bool {
        self.types.get(name).is_some_and(TypeDef::is_abstract)
    }

    pub fn is_composite(&self, name: &str) -> bool {
        self.types.get(name).is_some_and(TypeDef::is_composite)
    }

    pub fn is_enum(&self, name: &str) -> bool {
        matches!(
            self.types.get(name).map(|t| &t.kind),
            Some(TypeDefKind::Enum { .. })
        )
    }

    /// Object types a value of the abstract type `name` can have
    pub fn possible_types(&self, name: &str) -> Vec<&TypeDef> {
        match self.types.get(name).map(|t| &t.kind) {
            Some(TypeDefKind::Union { members }) => members
                .iter()
                .filter_map(|member| self.types.get(member))
                .collect(),
            Some(TypeDefKind::Interface { .. }) => self
                .types
                .values()
                .filter(|ty| ty.is_object() && ty.implements().iter().any(|i| i == name))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Record the parent fields `type_name.field` needs before it resolves
    pub fn set_requires(&mut self, type_name: &str, field: &str, requires: &[String]) -> Result<()> {
        let parent = self
            .types
            .get(type_name)
            .ok_or_else(|| Error::Composition(format!("unknown type {type_name}")))?;
        if let Some(missing) = requires.iter().find(|name| parent.field(name).is_none()) {
            return Err(Error::Composition(format!(
                "{type_name}.{field} requires unknown field {missing}"
            )));
        }

        let target = self
            .types
            .get_mut(type_name)
            .and_then(TypeDef::fields_mut)
            .and_then(|fields| fields.get_mut(field))
            .ok_or_else(|| Error::Composition(format!("unknown field {type_name}.{field}")))?;
        target.requires = requires.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: &str = r#"
        type Query {
            status: String!
            artist(id: String!): Artist
        }
        type Artist {
            id: String!
            name: String
        }
    "#;

    const REMOTE: &str = r#"
        schema { query: RootQuery }
        type RootQuery {
            artist(id: String!): Artist
            auctionResults(artistID: String!, first: Int = 10): [AuctionResult!]!
        }
        type Artist {
            id: String!
            name: String
            nationality: String
        }
        type AuctionResult {
            title: String
            artist: Artist
        }
    "#;

    fn merged() -> MergePlan {
        MergePlan::merge(vec![
            SchemaFragment::from_sdl(SourceId::Local, LOCAL).unwrap(),
            SchemaFragment::from_sdl(SourceId::Remote(0), REMOTE).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn custom_root_names_are_normalized() {
        let fragment = SchemaFragment::from_sdl(SourceId::Remote(0), REMOTE).unwrap();
        assert!(fragment.types.contains_key("Query"));
        assert!(!fragment.types.contains_key("RootQuery"));
    }

    #[test]
    fn later_source_wins_type_collisions() {
        let plan = merged();
        let artist = plan.get("Artist").unwrap();

        assert_eq!(artist.source, SourceId::Remote(0));
        assert!(artist.field("nationality").is_some());
        assert!(plan.collisions().iter().any(|c| c.type_name == "Artist"
            && c.field.is_none()
            && c.previous == SourceId::Local
            && c.winner == SourceId::Remote(0)));
    }

    #[test]
    fn root_fields_merge_field_by_field() {
        let plan = merged();
        let query = plan.get("Query").unwrap();

        assert_eq!(query.field("status").unwrap().origin, SourceId::Local);
        assert_eq!(query.field("artist").unwrap().origin, SourceId::Remote(0));
        assert_eq!(
            query.field("auctionResults").unwrap().origin,
            SourceId::Remote(0)
        );
        assert_eq!(
            query.field("auctionResults").unwrap().arg("first").unwrap().default_value,
            Some(GqlValue::from(10))
        );
    }

    #[test]
    fn precedence_is_declaration_order() {
        let plan = MergePlan::merge(vec![
            SchemaFragment::from_sdl(SourceId::Remote(0), REMOTE).unwrap(),
            SchemaFragment::from_sdl(SourceId::Local, LOCAL).unwrap(),
        ])
        .unwrap();

        assert_eq!(plan.precedence(), &[SourceId::Remote(0), SourceId::Local]);
        assert_eq!(plan.get("Artist").unwrap().source, SourceId::Local);
    }

    #[test]
    fn extensions_add_fields_owned_by_the_glue_source() {
        let mut plan = merged();
        plan.extend(
            SourceId::Glue(0),
            "extend type Artist { auctionResults: [AuctionResult!]! }",
        )
        .unwrap();

        let field = plan.get("Artist").unwrap().field("auctionResults").unwrap();
        assert_eq!(field.origin, SourceId::Glue(0));
        plan.validate().unwrap();
    }

    #[test]
    fn extending_an_unknown_type_is_a_composition_error() {
        let mut plan = merged();
        let err = plan
            .extend(SourceId::Glue(0), "extend type Fair { artists: [Artist] }")
            .unwrap_err();
        assert!(matches!(err, Error::Composition(_)));
    }

    #[test]
    fn dangling_references_fail_validation() {
        let mut plan = merged();
        plan.extend(SourceId::Glue(0), "extend type Artist { show: Show }")
            .unwrap();
        assert!(matches!(plan.validate(), Err(Error::Composition(_))));
    }

    #[test]
    fn possible_types_of_interfaces_and_unions() {
        let plan = MergePlan::merge(vec![SchemaFragment::from_sdl(
            SourceId::Local,
            r#"
                type Query { node: Node, search: SearchResult }
                interface Node { id: ID! }
                type Artist implements Node { id: ID! name: String }
                type Gallery implements Node { id: ID! city: String }
                union SearchResult = Artist | Gallery
            "#,
        )
        .unwrap()])
        .unwrap();

        let names = |ty: &str| -> Vec<String> {
            plan.possible_types(ty).iter().map(|t| t.name.clone()).collect()
        };
        assert_eq!(names("Node"), vec!["Artist", "Gallery"]);
        assert_eq!(names("SearchResult"), vec!["Artist", "Gallery"]);
        assert!(plan.is_abstract("Node"));
        assert!(!plan.is_abstract("Artist"));
    }
}

//! Remote schema introspection
//!
//! Runs the standard introspection query against a remote service and turns
//! the result into a [`SchemaFragment`] owned by that service.

use crate::error::{Error, Result};
use crate::link::RemoteExecutor;
use crate::plan::{
    is_builtin_scalar, FieldDef, InputValueDef, RootNames, SchemaFragment, SourceId, TypeDef,
    TypeDefKind, TypeRefDef,
};
use crate::types::GraphQLRequest;
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::parse_schema;
use async_graphql::parser::types::{TypeKind, TypeSystemDefinition};
use async_graphql::Value as GqlValue;
use serde::Deserialize;

pub const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    types {
      kind
      name
      description
      fields(includeDeprecated: true) {
        name
        description
        args { ...InputValue }
        type { ...TypeRef }
      }
      inputFields { ...InputValue }
      interfaces { name }
      enumValues(includeDeprecated: true) { name }
      possibleTypes { name }
    }
  }
}

fragment InputValue on __InputValue {
  name
  description
  type { ...TypeRef }
  defaultValue
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionData {
    #[serde(rename = "__schema")]
    schema: SchemaDescriptor,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaDescriptor {
    query_type: Option<NamedRef>,
    mutation_type: Option<NamedRef>,
    types: Vec<TypeDescriptor>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeDescriptor {
    kind: String,
    name: String,
    description: Option<String>,
    fields: Option<Vec<FieldDescriptor>>,
    input_fields: Option<Vec<InputValueDescriptor>>,
    interfaces: Option<Vec<NamedRef>>,
    enum_values: Option<Vec<NamedRef>>,
    possible_types: Option<Vec<NamedRef>>,
}

#[derive(Debug, Deserialize)]
struct FieldDescriptor {
    name: String,
    description: Option<String>,
    #[serde(default)]
    args: Vec<InputValueDescriptor>,
    #[serde(rename = "type")]
    ty: TypeRefDescriptor,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputValueDescriptor {
    name: String,
    description: Option<String>,
    #[serde(rename = "type")]
    ty: TypeRefDescriptor,
    default_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeRefDescriptor {
    kind: String,
    name: Option<String>,
    of_type: Option<Box<TypeRefDescriptor>>,
}

impl TypeRefDescriptor {
    fn to_type_ref(&self) -> Result<TypeRefDef> {
        let inner = || {
            self.of_type
                .as_deref()
                .ok_or_else(|| Error::Composition(format!("{} type without ofType", self.kind)))
                .and_then(TypeRefDescriptor::to_type_ref)
        };
        match self.kind.as_str() {
            "NON_NULL" => Ok(TypeRefDef::NonNull(Box::new(inner()?))),
            "LIST" => Ok(TypeRefDef::List(Box::new(inner()?))),
            _ => self
                .name
                .clone()
                .map(TypeRefDef::Named)
                .ok_or_else(|| Error::Composition("named type reference without a name".into())),
        }
    }
}

impl InputValueDescriptor {
    fn into_def(self) -> Result<InputValueDef> {
        Ok(InputValueDef {
            ty: self.ty.to_type_ref()?,
            default_value: self.default_value.as_deref().and_then(parse_default),
            name: self.name,
            description: self.description,
        })
    }
}

/// Introspection prints default values as GraphQL literals; they are read
/// back with the schema parser as the default of a throwaway argument.
fn parse_default(literal: &str) -> Option<GqlValue> {
    let document =
        parse_schema(format!("type Default {{ value(arg: Default = {literal}): Default }}")).ok()?;
    document
        .definitions
        .into_iter()
        .find_map(|definition| match definition {
            TypeSystemDefinition::Type(def) => match def.node.kind {
                TypeKind::Object(object) => {
                    let field = object.fields.into_iter().next()?.node;
                    let arg = field.arguments.into_iter().next()?.node;
                    arg.default_value.map(|value| value.node)
                }
                _ => None,
            },
            _ => None,
        })
}

impl TypeDescriptor {
    fn into_def(self, source: SourceId) -> Result<TypeDef> {
        let names = |refs: Option<Vec<NamedRef>>| -> Vec<String> {
            refs.unwrap_or_default().into_iter().map(|r| r.name).collect()
        };
        let fields = |fields: Option<Vec<FieldDescriptor>>| -> Result<IndexMap<String, FieldDef>> {
            fields
                .unwrap_or_default()
                .into_iter()
                .map(|field| {
                    let mut def = FieldDef::new(field.name.clone(), field.ty.to_type_ref()?, source);
                    def.description = field.description;
                    def.args = field
                        .args
                        .into_iter()
                        .map(InputValueDescriptor::into_def)
                        .collect::<Result<_>>()?;
                    Ok((field.name, def))
                })
                .collect()
        };

        let kind = match self.kind.as_str() {
            "OBJECT" => TypeDefKind::Object {
                implements: names(self.interfaces),
                fields: fields(self.fields)?,
            },
            "INTERFACE" => TypeDefKind::Interface {
                implements: names(self.interfaces),
                fields: fields(self.fields)?,
            },
            "UNION" => TypeDefKind::Union {
                members: names(self.possible_types),
            },
            "ENUM" => TypeDefKind::Enum {
                values: names(self.enum_values),
            },
            "INPUT_OBJECT" => TypeDefKind::InputObject {
                fields: self
                    .input_fields
                    .unwrap_or_default()
                    .into_iter()
                    .map(InputValueDescriptor::into_def)
                    .collect::<Result<_>>()?,
            },
            "SCALAR" => TypeDefKind::Scalar,
            other => {
                return Err(Error::Composition(format!(
                    "unsupported type kind {other} for {}",
                    self.name
                )))
            }
        };

        Ok(TypeDef {
            name: self.name,
            description: self.description,
            kind,
            source,
        })
    }
}

/// Convert an introspection result (the `data` member) into a fragment.
/// Introspection types and built-in scalars are skipped.
pub fn fragment_from_introspection(source: SourceId, data: serde_json::Value) -> Result<SchemaFragment> {
    let data: IntrospectionData = serde_json::from_value(data)
        .map_err(|e| Error::Composition(format!("malformed introspection result: {e}")))?;
    let schema = data.schema;

    let mut fragment = SchemaFragment::new(source);
    for descriptor in schema.types {
        if descriptor.name.starts_with("__") || is_builtin_scalar(&descriptor.name) {
            continue;
        }
        let ty = descriptor.into_def(source)?;
        fragment.types.insert(ty.name.clone(), ty);
    }

    fragment.normalize_roots(&RootNames {
        query: schema.query_type.map(|t| t.name),
        mutation: schema.mutation_type.map(|t| t.name),
    });
    Ok(fragment)
}

/// Introspect one remote service
pub async fn introspect(executor: &RemoteExecutor, source: SourceId) -> Result<SchemaFragment> {
    tracing::info!(service = executor.name(), "introspecting remote schema");
    let request = GraphQLRequest::new(INTROSPECTION_QUERY).operation_name("IntrospectionQuery");
    let data = executor.execute(request, None).await?;
    let fragment = fragment_from_introspection(source, data)?;
    tracing::debug!(
        service = executor.name(),
        types = fragment.types.len(),
        "remote schema introspected"
    );
    Ok(fragment)
}

//! Identifier field renaming
//!
//! Services expose `id` fields that mean different things: a database
//! identifier on one type, a globally unique identifier on another. The merged
//! schema never exposes a bare `id`. Each one is renamed to `internalID` or
//! `publicID`, decided by the field's description, by an explicit per-type
//! list, or by an interface the type implements. An `id` that fits none of
//! those fails composition.
//!
//! The rename only changes the merged name. Fields keep their source name,
//! which is what [`crate::delegation`] prints when the field is delegated.

use crate::error::{Error, Result};
use crate::plan::{FieldDef, MergePlan, TypeDef, TypeDefKind};
use async_graphql::indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

pub const INTERNAL_ID_DESCRIPTION: &str = "A type-specific ID likely used as a database ID.";
pub const PUBLIC_ID_DESCRIPTION: &str = "A globally unique ID.";

/// What an identifier field means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRole {
    Internal,
    Public,
}

/// Renaming rules for identifier fields
#[derive(Debug, Clone)]
pub struct IdTransform {
    field: String,
    internal_alias: String,
    public_alias: String,
    internal_types: HashSet<String>,
    public_types: HashSet<String>,
}

impl Default for IdTransform {
    fn default() -> Self {
        Self {
            field: "id".into(),
            internal_alias: "internalID".into(),
            public_alias: "publicID".into(),
            internal_types: HashSet::new(),
            public_types: HashSet::new(),
        }
    }
}

impl IdTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat the identifier of `type_name` as internal regardless of its
    /// description
    pub fn internal_type(mut self, type_name: impl Into<String>) -> Self {
        self.internal_types.insert(type_name.into());
        self
    }

    pub fn public_type(mut self, type_name: impl Into<String>) -> Self {
        self.public_types.insert(type_name.into());
        self
    }

    pub fn aliases(mut self, internal: impl Into<String>, public: impl Into<String>) -> Self {
        self.internal_alias = internal.into();
        self.public_alias = public.into();
        self
    }

    pub fn alias(&self, role: IdRole) -> &str {
        match role {
            IdRole::Internal => &self.internal_alias,
            IdRole::Public => &self.public_alias,
        }
    }

    fn explicit_role(&self, ty: &TypeDef, field: &FieldDef) -> Option<IdRole> {
        if self.internal_types.contains(&ty.name) {
            return Some(IdRole::Internal);
        }
        if self.public_types.contains(&ty.name) {
            return Some(IdRole::Public);
        }
        match field.description.as_deref() {
            Some(d) if d.contains(INTERNAL_ID_DESCRIPTION) => Some(IdRole::Internal),
            Some(d) if d.contains(PUBLIC_ID_DESCRIPTION) => Some(IdRole::Public),
            _ => None,
        }
    }

    /// Rename every identifier field of `plan`. Root types are left alone.
    pub fn apply(&self, plan: &mut MergePlan) -> Result<()> {
        let mut interface_roles: HashMap<String, IdRole> = HashMap::new();
        for ty in plan.types() {
            if !matches!(ty.kind, TypeDefKind::Interface { .. }) {
                continue;
            }
            if let Some(field) = ty.field(&self.field) {
                let role = self.explicit_role(ty, field).ok_or_else(|| self.conflict(ty))?;
                interface_roles.insert(ty.name.clone(), role);
            }
        }

        let mut renames = Vec::new();
        for ty in plan.types() {
            if ty.name == "Query" || ty.name == "Mutation" {
                continue;
            }
            let Some(field) = ty.field(&self.field) else {
                continue;
            };
            let role = match interface_roles.get(&ty.name) {
                Some(role) => *role,
                None => self
                    .explicit_role(ty, field)
                    .or_else(|| {
                        ty.implements()
                            .iter()
                            .find_map(|interface| interface_roles.get(interface).copied())
                    })
                    .ok_or_else(|| self.conflict(ty))?,
            };
            if ty.field(self.alias(role)).is_some() {
                return Err(Error::NamingConflict {
                    type_name: ty.name.clone(),
                    field: self.alias(role).to_string(),
                });
            }
            renames.push((ty.name.clone(), role));
        }

        for ty in plan.types_mut() {
            let Some(role) = renames
                .iter()
                .find(|(name, _)| *name == ty.name)
                .map(|(_, role)| *role)
            else {
                continue;
            };
            let alias = self.alias(role).to_string();
            tracing::trace!(type_name = %ty.name, alias = %alias, "renaming identifier field");
            if let Some(fields) = ty.fields_mut() {
                rename_field(fields, &self.field, &alias);
            }
        }
        Ok(())
    }

    fn conflict(&self, ty: &TypeDef) -> Error {
        Error::NamingConflict {
            type_name: ty.name.clone(),
            field: self.field.clone(),
        }
    }
}

/// Rename `from` to `to` keeping the field's position
fn rename_field(fields: &mut IndexMap<String, FieldDef>, from: &str, to: &str) {
    let taken = std::mem::take(fields);
    *fields = taken
        .into_iter()
        .map(|(name, mut field)| {
            if name == from {
                field.name = to.to_string();
                (to.to_string(), field)
            } else {
                (name, field)
            }
        })
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{SchemaFragment, SourceId};

    fn plan(sdl: &str) -> MergePlan {
        MergePlan::merge(vec![SchemaFragment::from_sdl(SourceId::Remote(0), sdl).unwrap()]).unwrap()
    }

    fn field_names(plan: &MergePlan, ty: &str) -> Vec<String> {
        plan.get(ty).unwrap().fields().unwrap().keys().cloned().collect()
    }

    #[test]
    fn descriptions_decide_the_alias() {
        let mut plan = plan(
            r#"
                type Query { artist(id: String!): Artist }
                type Artist {
                    "A type-specific ID likely used as a database ID."
                    id: ID!
                    name: String
                }
                type Sale {
                    "A globally unique ID."
                    id: ID!
                }
            "#,
        );

        IdTransform::new().apply(&mut plan).unwrap();

        assert_eq!(field_names(&plan, "Artist"), vec!["internalID", "name"]);
        assert_eq!(field_names(&plan, "Sale"), vec!["publicID"]);
        let internal = plan.get("Artist").unwrap().field("internalID").unwrap();
        assert_eq!(internal.source_name, "id");
        // arguments named id are untouched
        assert!(plan.get("Query").unwrap().field("artist").unwrap().arg("id").is_some());
    }

    #[test]
    fn an_unmarked_id_is_a_naming_conflict() {
        let mut plan = plan(
            r#"
                type Query { lot: Lot }
                type Lot { id: ID! title: String }
            "#,
        );

        let err = IdTransform::new().apply(&mut plan).unwrap_err();
        assert!(matches!(
            err,
            Error::NamingConflict { ref type_name, ref field } if type_name == "Lot" && field == "id"
        ));
    }

    #[test]
    fn allowlists_override_missing_descriptions() {
        let mut plan = plan(
            r#"
                type Query { lot: Lot }
                type Lot { id: ID! }
            "#,
        );

        IdTransform::new()
            .internal_type("Lot")
            .apply(&mut plan)
            .unwrap();
        assert_eq!(field_names(&plan, "Lot"), vec!["internalID"]);
    }

    #[test]
    fn implementations_inherit_the_interface_decision() {
        let mut plan = plan(
            r#"
                type Query { node: Node }
                interface Node {
                    "A globally unique ID."
                    id: ID!
                }
                type Artwork implements Node { id: ID! title: String }
            "#,
        );

        IdTransform::new().apply(&mut plan).unwrap();

        assert_eq!(field_names(&plan, "Node"), vec!["publicID"]);
        assert_eq!(field_names(&plan, "Artwork"), vec!["publicID", "title"]);
        plan.validate().unwrap();
    }

    #[test]
    fn existing_alias_fields_conflict() {
        let mut plan = plan(
            r#"
                type Query { artist: Artist }
                type Artist {
                    "A type-specific ID likely used as a database ID."
                    id: ID!
                    internalID: ID!
                }
            "#,
        );

        assert!(matches!(
            IdTransform::new().apply(&mut plan),
            Err(Error::NamingConflict { .. })
        ));
    }
}

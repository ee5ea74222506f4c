//! Sub-query construction for delegated fields
//!
//! The client's selection under a delegated field is re-printed as a query for
//! the owning remote service. Only fields that service owns are kept, merged
//! names are translated back to the names the service knows (`internalID`
//! becomes `id` again) and response keys are preserved through aliases so
//! the result can be read back without another rename pass.

use crate::error::{Error, Result};
use crate::plan::{MergePlan, SourceId, TypeDef, TypeDefKind, TypeRefDef};
use crate::types::{GraphQLRequest, OperationKind};
use async_graphql::{Name, SelectionField, Value as GqlValue};

/// Response key of the root field in a stitched sub-query
pub const STITCHED_KEY: &str = "stitched";

/// Response key under which a field needed by a stitched resolver is fetched
pub fn dependency_key(field: &str) -> String {
    format!("_stitch_{field}")
}

pub struct SubqueryBuilder<'p> {
    plan: &'p MergePlan,
    target: SourceId,
}

impl<'p> SubqueryBuilder<'p> {
    pub fn new(plan: &'p MergePlan, target: SourceId) -> Self {
        Self { plan, target }
    }

    /// Operation for one root field of the client's request
    pub fn root_field(&self, kind: OperationKind, field: &SelectionField<'_>) -> Result<GraphQLRequest> {
        let root = self.root(kind)?;
        let mut out = format!("{} {{", kind.keyword());
        self.write_field(&mut out, root, field)?;
        out.push_str(" }");
        Ok(GraphQLRequest::new(out))
    }

    /// Operation calling the service's `root_field` with `args`, selecting
    /// what the client selected under the extension `field`.
    pub fn stitched_field<'a>(
        &self,
        kind: OperationKind,
        root_field: &str,
        args: impl IntoIterator<Item = (&'a Name, &'a GqlValue)>,
        field: &SelectionField<'_>,
        ty: &TypeRefDef,
    ) -> Result<GraphQLRequest> {
        let root = self.root(kind)?;
        let target = root
            .fields()
            .and_then(|fields| {
                fields
                    .values()
                    .find(|f| f.origin == self.target && f.source_name == root_field)
            })
            .ok_or_else(|| {
                Error::Composition(format!(
                    "{}.{root_field} is not served by the delegated service",
                    kind.root_type()
                ))
            })?;

        let mut out = format!("{} {{ {STITCHED_KEY}: {root_field}", kind.keyword());
        self.write_arguments(&mut out, args, |name| target.arg(name).map(|a| &a.ty));
        self.write_selection(&mut out, ty.named_type(), field.selection_set())?;
        out.push_str(" }");
        Ok(GraphQLRequest::new(out))
    }

    fn root(&self, kind: OperationKind) -> Result<&'p TypeDef> {
        self.plan
            .get(kind.root_type())
            .ok_or_else(|| Error::Schema(format!("merged schema has no {} type", kind.root_type())))
    }

    fn write_field(&self, out: &mut String, parent: &TypeDef, selection: &SelectionField<'_>) -> Result<()> {
        let name = selection.name();
        if name == "__typename" {
            return Ok(());
        }
        let Some(field) = parent.field(name) else {
            return Ok(());
        };
        if field.origin != self.target {
            self.write_dependencies(out, parent, &field.requires);
            return Ok(());
        }

        let key = selection.alias().unwrap_or(name);
        out.push(' ');
        if key != field.source_name {
            out.push_str(key);
            out.push_str(": ");
        }
        out.push_str(&field.source_name);

        let arguments = selection
            .arguments()
            .map_err(|e| Error::InvalidRequest(e.message))?;
        self.write_arguments(
            out,
            arguments.iter().map(|(name, value)| (name, value)),
            |arg| field.arg(arg).map(|a| &a.ty),
        );
        self.write_selection(out, field.ty.named_type(), selection.selection_set())
    }

    fn write_selection<'a>(
        &self,
        out: &mut String,
        type_name: &str,
        selection: impl Iterator<Item = SelectionField<'a>>,
    ) -> Result<()> {
        let Some(ty) = self.plan.get(type_name) else {
            return Ok(());
        };
        if !ty.is_composite() {
            return Ok(());
        }

        out.push_str(" { __typename");
        for child in selection {
            if ty.is_object() || ty.field(child.name()).is_some() {
                self.write_field(out, ty, &child)?;
                continue;
            }
            for concrete in self.plan.possible_types(type_name) {
                if concrete.field(child.name()).is_none() {
                    continue;
                }
                out.push_str(" ... on ");
                out.push_str(&concrete.name);
                out.push_str(" {");
                self.write_field(out, concrete, &child)?;
                out.push_str(" }");
            }
        }
        out.push_str(" }");
        Ok(())
    }

    /// Leaf fields another resolver needs from this object
    fn write_dependencies(&self, out: &mut String, parent: &TypeDef, requires: &[String]) {
        for name in requires {
            let Some(field) = parent.field(name) else { continue };
            if field.origin != self.target || self.plan.is_composite(field.ty.named_type()) {
                continue;
            }
            out.push(' ');
            out.push_str(&dependency_key(name));
            out.push_str(": ");
            out.push_str(&field.source_name);
        }
    }

    fn write_arguments<'a, 't>(
        &self,
        out: &mut String,
        args: impl IntoIterator<Item = (&'a Name, &'a GqlValue)>,
        arg_type: impl Fn(&str) -> Option<&'t TypeRefDef>,
    ) {
        let mut args = args.into_iter().peekable();
        if args.peek().is_none() {
            return;
        }
        out.push('(');
        for (i, (name, value)) in args.enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(name.as_str());
            out.push_str(": ");
            self.write_value(out, value, arg_type(name.as_str()));
        }
        out.push(')');
    }

    /// Print `value` as a GraphQL literal. Strings at enum positions are
    /// printed as enum values.
    fn write_value(&self, out: &mut String, value: &GqlValue, ty: Option<&TypeRefDef>) {
        match value {
            GqlValue::String(s) if ty.is_some_and(|t| self.plan.is_enum(t.named_type())) => {
                out.push_str(s)
            }
            GqlValue::List(items) => {
                let item_ty = ty.map(TypeRefDef::list_item);
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_value(out, item, item_ty);
                }
                out.push(']');
            }
            GqlValue::Object(fields) => {
                let input = ty.and_then(|t| self.plan.get(t.named_type()));
                let field_type = |name: &str| match input.map(|t| &t.kind) {
                    Some(TypeDefKind::InputObject { fields }) => {
                        fields.iter().find(|f| f.name == name).map(|f| &f.ty)
                    }
                    _ => None,
                };
                out.push('{');
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(name.as_str());
                    out.push_str(": ");
                    self.write_value(out, value, field_type(name.as_str()));
                }
                out.push('}');
            }
            other => out.push_str(&other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SchemaFragment;

    fn plan() -> MergePlan {
        MergePlan::merge(vec![SchemaFragment::from_sdl(
            SourceId::Remote(0),
            r#"
                type Query { lots(sort: LotSort, filter: LotFilter, ids: [String!]): [Lot] }
                enum LotSort { DATE_ASC DATE_DESC }
                input LotFilter { sort: LotSort, title: String }
                type Lot { title: String }
            "#,
        )
        .unwrap()])
        .unwrap()
    }

    fn print(value: GqlValue, ty: &TypeRefDef) -> String {
        let plan = plan();
        let builder = SubqueryBuilder::new(&plan, SourceId::Remote(0));
        let mut out = String::new();
        builder.write_value(&mut out, &value, Some(ty));
        out
    }

    #[test]
    fn strings_at_enum_positions_become_enum_literals() {
        assert_eq!(
            print(GqlValue::from("DATE_DESC"), &TypeRefDef::named("LotSort")),
            "DATE_DESC"
        );
        assert_eq!(
            print(GqlValue::from("DATE_DESC"), &TypeRefDef::named("String")),
            "\"DATE_DESC\""
        );
    }

    #[test]
    fn input_objects_and_lists_coerce_their_members() {
        let filter = GqlValue::from_json(serde_json::json!({
            "sort": "DATE_ASC",
            "title": "Untitled \"1\""
        }))
        .unwrap();
        assert_eq!(
            print(filter, &TypeRefDef::named("LotFilter")),
            r#"{sort: DATE_ASC, title: "Untitled \"1\""}"#
        );

        let ids = GqlValue::List(vec![GqlValue::from("a"), GqlValue::from("b")]);
        let ty = TypeRefDef::List(Box::new(TypeRefDef::named("String")));
        assert_eq!(print(ids, &ty), r#"["a", "b"]"#);
    }

    #[test]
    fn dependency_keys_are_prefixed() {
        assert_eq!(dependency_key("internalID"), "_stitch_internalID");
    }
}

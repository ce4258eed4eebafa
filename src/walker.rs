use graphql_parser::query::{
    self, Definition, FragmentDefinition, OperationDefinition, Selection, TypeCondition,
};
use std::collections::HashMap;

use crate::error::PlanningError;
use crate::schema::{OperationKind, SchemaIndex};

pub type Document = query::Document<'static, String>;
pub type Field = query::Field<'static, String>;
pub type SelectionSet = query::SelectionSet<'static, String>;
pub type Value = query::Value<'static, String>;
pub type VariableDefinition = query::VariableDefinition<'static, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AncestorKind {
    OperationDefinition,
    SelectionSet,
    Field,
    InlineFragment,
}

/// Callbacks fired in document order. Every enter has exactly one matching leave.
#[allow(unused_variables)]
pub trait Visitor {
    fn enter_document(&mut self, ctx: &mut WalkContext<'_>) {}
    fn leave_document(&mut self, ctx: &mut WalkContext<'_>) {}
    fn enter_operation_definition(&mut self, ctx: &mut WalkContext<'_>) {}
    fn leave_operation_definition(&mut self, ctx: &mut WalkContext<'_>) {}
    fn enter_selection_set(&mut self, ctx: &mut WalkContext<'_>, set: &SelectionSet) {}
    fn leave_selection_set(&mut self, ctx: &mut WalkContext<'_>, set: &SelectionSet) {}
    fn enter_field(&mut self, ctx: &mut WalkContext<'_>, field: &Field) {}
    fn leave_field(&mut self, ctx: &mut WalkContext<'_>, field: &Field) {}
    fn enter_argument(&mut self, ctx: &mut WalkContext<'_>, field: &Field, name: &str, value: &Value) {}
    fn enter_inline_fragment(&mut self, ctx: &mut WalkContext<'_>, type_condition: Option<&str>) {}
    fn leave_inline_fragment(&mut self, ctx: &mut WalkContext<'_>, type_condition: Option<&str>) {}
}

/// Position of the walk: enclosing types, ancestors and the response path of enclosing fields.
pub struct WalkContext<'a> {
    pub schema: &'a SchemaIndex,
    operation_kind: OperationKind,
    variable_definitions: &'a [VariableDefinition],
    type_stack: Vec<String>,
    ancestors: Vec<AncestorKind>,
    path: Vec<String>,
    error: Option<PlanningError>,
}

impl<'a> WalkContext<'a> {
    pub fn operation_kind(&self) -> OperationKind {
        self.operation_kind
    }

    pub fn enclosing_type_name(&self) -> &str {
        self.type_stack.last().map(String::as_str).unwrap_or_default()
    }

    pub fn enclosing_type_is_abstract(&self) -> bool {
        self.schema.is_abstract(self.enclosing_type_name())
    }

    /// Whether the selection set around the enclosing one is typed abstract.
    pub fn parent_type_is_abstract(&self) -> bool {
        self.type_stack.len() >= 2
            && self
                .schema
                .is_abstract(&self.type_stack[self.type_stack.len() - 2])
    }

    pub fn ancestors(&self) -> &[AncestorKind] {
        &self.ancestors
    }

    pub fn selection_set_depth(&self) -> usize {
        self.ancestors
            .iter()
            .filter(|a| **a == AncestorKind::SelectionSet)
            .count()
    }

    /// Response keys of the enclosing fields. Inside `enter_field` this is the parent path.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn field_path(&self, field: &Field) -> Vec<String> {
        let mut path = self.path.clone();
        path.push(response_key(field).to_string());
        path
    }

    pub fn variable_definition(&self, name: &str) -> Option<&'a VariableDefinition> {
        self.variable_definitions.iter().find(|v| v.name == name)
    }

    pub fn stop_with_internal_err(&mut self, err: PlanningError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.error.is_some()
    }
}

pub fn response_key(field: &Field) -> &str {
    field.alias.as_deref().unwrap_or(&field.name)
}

pub struct OperationParts<'a> {
    pub kind: OperationKind,
    pub name: Option<&'a str>,
    pub variable_definitions: &'a [VariableDefinition],
    pub selection_set: &'a SelectionSet,
}

/// Picks the named operation, or the only one when no name is given.
pub fn find_operation<'a>(
    document: &'a Document,
    operation_name: Option<&str>,
) -> Result<OperationParts<'a>, PlanningError> {
    let mut operations = document.definitions.iter().filter_map(|d| match d {
        Definition::Operation(op) => Some(operation_parts(op)),
        Definition::Fragment(_) => None,
    });

    let found = match operation_name {
        Some(name) => operations.find(|op| op.name == Some(name)),
        None => {
            let first = operations.next();
            if operations.next().is_some() {
                None
            } else {
                first
            }
        }
    };
    found.ok_or_else(|| PlanningError::UnknownOperation(operation_name.map(str::to_string)))
}

fn operation_parts<'a>(op: &'a OperationDefinition<'static, String>) -> OperationParts<'a> {
    match op {
        OperationDefinition::SelectionSet(set) => OperationParts {
            kind: OperationKind::Query,
            name: None,
            variable_definitions: &[],
            selection_set: set,
        },
        OperationDefinition::Query(q) => OperationParts {
            kind: OperationKind::Query,
            name: q.name.as_deref(),
            variable_definitions: &q.variable_definitions,
            selection_set: &q.selection_set,
        },
        OperationDefinition::Mutation(m) => OperationParts {
            kind: OperationKind::Mutation,
            name: m.name.as_deref(),
            variable_definitions: &m.variable_definitions,
            selection_set: &m.selection_set,
        },
        OperationDefinition::Subscription(s) => OperationParts {
            kind: OperationKind::Subscription,
            name: s.name.as_deref(),
            variable_definitions: &s.variable_definitions,
            selection_set: &s.selection_set,
        },
    }
}

/// Drives a [`Visitor`] over one operation of a document, typed against a schema.
/// Fragment spreads are visited as inline fragments.
pub struct Walker<'a> {
    schema: &'a SchemaIndex,
    document: &'a Document,
    fragments: HashMap<&'a str, &'a FragmentDefinition<'static, String>>,
}

impl<'a> Walker<'a> {
    pub fn new(schema: &'a SchemaIndex, document: &'a Document) -> Self {
        let fragments = document
            .definitions
            .iter()
            .filter_map(|d| match d {
                Definition::Fragment(f) => Some((f.name.as_str(), f)),
                Definition::Operation(_) => None,
            })
            .collect();
        Walker {
            schema,
            document,
            fragments,
        }
    }

    pub fn walk<V: Visitor>(
        &self,
        operation_name: Option<&str>,
        visitor: &mut V,
    ) -> Result<(), PlanningError> {
        let operation = find_operation(self.document, operation_name)?;
        let mut ctx = WalkContext {
            schema: self.schema,
            operation_kind: operation.kind,
            variable_definitions: operation.variable_definitions,
            type_stack: Vec::new(),
            ancestors: Vec::new(),
            path: Vec::new(),
            error: None,
        };

        let root_type = self.schema.root_type_name(operation.kind).to_string();
        if !self.schema.has_type(&root_type) {
            return Err(PlanningError::Internal(format!(
                "schema has no root type {root_type}"
            )));
        }

        let mut visiting = Vec::new();
        visitor.enter_document(&mut ctx);
        visitor.enter_operation_definition(&mut ctx);
        ctx.ancestors.push(AncestorKind::OperationDefinition);
        self.walk_selection_set(&mut ctx, visitor, &root_type, operation.selection_set, &mut visiting);
        ctx.ancestors.pop();
        visitor.leave_operation_definition(&mut ctx);
        visitor.leave_document(&mut ctx);

        match ctx.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn walk_selection_set<V: Visitor>(
        &self,
        ctx: &mut WalkContext<'a>,
        visitor: &mut V,
        type_name: &str,
        set: &'a SelectionSet,
        visiting: &mut Vec<&'a str>,
    ) {
        if ctx.is_stopped() {
            return;
        }
        ctx.type_stack.push(type_name.to_string());
        visitor.enter_selection_set(ctx, set);
        ctx.ancestors.push(AncestorKind::SelectionSet);

        for selection in &set.items {
            if ctx.is_stopped() {
                break;
            }
            match selection {
                Selection::Field(field) => self.walk_field(ctx, visitor, field, visiting),
                Selection::InlineFragment(fragment) => {
                    let type_condition = fragment.type_condition.as_ref().map(|TypeCondition::On(t)| t.as_str());
                    self.walk_inline_fragment(ctx, visitor, type_condition, &fragment.selection_set, visiting);
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.fragment_name.as_str();
                    let Some(fragment) = self.fragments.get(name) else {
                        ctx.stop_with_internal_err(PlanningError::Internal(format!(
                            "fragment {name} is not defined"
                        )));
                        break;
                    };
                    if visiting.contains(&name) {
                        ctx.stop_with_internal_err(PlanningError::Internal(format!(
                            "fragment {name} spreads itself"
                        )));
                        break;
                    }
                    let TypeCondition::On(type_condition) = &fragment.type_condition;
                    visiting.push(name);
                    self.walk_inline_fragment(ctx, visitor, Some(type_condition), &fragment.selection_set, visiting);
                    visiting.pop();
                }
            }
        }

        ctx.ancestors.pop();
        visitor.leave_selection_set(ctx, set);
        ctx.type_stack.pop();
    }

    fn walk_field<V: Visitor>(
        &self,
        ctx: &mut WalkContext<'a>,
        visitor: &mut V,
        field: &'a Field,
        visiting: &mut Vec<&'a str>,
    ) {
        let enclosing = ctx.enclosing_type_name().to_string();
        let Some(field_type) = self.schema.field_type_name(&enclosing, &field.name) else {
            ctx.stop_with_internal_err(PlanningError::Internal(format!(
                "field {} is not defined on type {}",
                field.name, enclosing
            )));
            return;
        };

        visitor.enter_field(ctx, field);
        ctx.ancestors.push(AncestorKind::Field);
        for (name, value) in &field.arguments {
            visitor.enter_argument(ctx, field, name, value);
        }
        if !field.selection_set.items.is_empty() {
            ctx.path.push(response_key(field).to_string());
            self.walk_selection_set(ctx, visitor, &field_type, &field.selection_set, visiting);
            ctx.path.pop();
        }
        ctx.ancestors.pop();
        visitor.leave_field(ctx, field);
    }

    fn walk_inline_fragment<V: Visitor>(
        &self,
        ctx: &mut WalkContext<'a>,
        visitor: &mut V,
        type_condition: Option<&'a str>,
        set: &'a SelectionSet,
        visiting: &mut Vec<&'a str>,
    ) {
        let type_name = match type_condition {
            Some(t) if !self.schema.has_type(t) => {
                ctx.stop_with_internal_err(PlanningError::Internal(format!(
                    "unknown type {t} in fragment type condition"
                )));
                return;
            }
            Some(t) => t.to_string(),
            None => ctx.enclosing_type_name().to_string(),
        };

        visitor.enter_inline_fragment(ctx, type_condition);
        ctx.ancestors.push(AncestorKind::InlineFragment);
        self.walk_selection_set(ctx, visitor, &type_name, set, visiting);
        ctx.ancestors.pop();
        visitor.leave_inline_fragment(ctx, type_condition);
    }
}

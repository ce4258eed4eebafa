use graphql_parser::query::{
    Definition, InlineFragment, Mutation, OperationDefinition, Query, Selection, Subscription,
    TypeCondition,
};
use std::collections::HashSet;

use crate::normalizer::pos;
use crate::schema::{OperationKind, SchemaType};
use crate::walker::{Document, Field, SelectionSet, Value, VariableDefinition};

/// Insertion points of the operation under construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    OperationRoot,
    SelectionSet(usize),
    Field(usize),
    InlineFragment(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SelectionRef {
    Field(usize),
    InlineFragment(usize),
}

#[derive(Clone, Debug)]
pub struct UpstreamField {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, Value)>,
    pub selection_set: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct UpstreamInlineFragment {
    pub type_condition: Option<String>,
    pub selection_set: Option<usize>,
}

/// Arena-backed operation built up node by node while the client operation is walked.
#[derive(Clone, Debug)]
pub struct UpstreamOperation {
    kind: OperationKind,
    variable_definitions: Vec<VariableDefinition>,
    selection_set: Option<usize>,
    selection_sets: Vec<Vec<SelectionRef>>,
    fields: Vec<UpstreamField>,
    inline_fragments: Vec<UpstreamInlineFragment>,
}

impl UpstreamOperation {
    pub fn new(kind: OperationKind) -> Self {
        UpstreamOperation {
            kind,
            variable_definitions: Vec::new(),
            selection_set: None,
            selection_sets: Vec::new(),
            fields: Vec::new(),
            inline_fragments: Vec::new(),
        }
    }

    pub fn add_selection_set(&mut self) -> usize {
        self.selection_sets.push(Vec::new());
        self.selection_sets.len() - 1
    }

    /// Attaches a fresh selection set below `parent` and returns it.
    pub fn attach_selection_set(&mut self, parent: Node) -> Option<usize> {
        let set = self.add_selection_set();
        match parent {
            Node::OperationRoot => self.selection_set = Some(set),
            Node::Field(field) => self.fields.get_mut(field)?.selection_set = Some(set),
            Node::InlineFragment(fragment) => {
                self.inline_fragments.get_mut(fragment)?.selection_set = Some(set)
            }
            Node::SelectionSet(_) => return None,
        }
        Some(set)
    }

    pub fn add_field(&mut self, set: usize, alias: Option<String>, name: &str) -> usize {
        self.fields.push(UpstreamField {
            alias,
            name: name.to_string(),
            arguments: Vec::new(),
            selection_set: None,
        });
        let field = self.fields.len() - 1;
        if let Some(items) = self.selection_sets.get_mut(set) {
            items.push(SelectionRef::Field(field));
        }
        field
    }

    pub fn add_inline_fragment(&mut self, set: usize, type_condition: Option<String>) -> usize {
        self.inline_fragments.push(UpstreamInlineFragment {
            type_condition,
            selection_set: None,
        });
        let fragment = self.inline_fragments.len() - 1;
        if let Some(items) = self.selection_sets.get_mut(set) {
            items.push(SelectionRef::InlineFragment(fragment));
        }
        fragment
    }

    pub fn add_argument(&mut self, field: usize, name: &str, value: Value) {
        if let Some(field) = self.fields.get_mut(field) {
            field.arguments.push((name.to_string(), value));
        }
    }

    /// Adds `$name: ty` unless a definition with that name exists.
    pub fn add_variable_definition(&mut self, name: &str, ty: SchemaType) {
        if self.variable_definitions.iter().any(|v| v.name == name) {
            return;
        }
        self.variable_definitions.push(VariableDefinition {
            position: pos(),
            name: name.to_string(),
            var_type: ty,
            default_value: None,
        });
    }

    pub fn variable_names(&self) -> HashSet<String> {
        self.variable_definitions
            .iter()
            .map(|v| v.name.clone())
            .collect()
    }

    /// Whether `set` directly selects `name` under its own response key.
    pub fn selects(&self, set: usize, name: &str) -> bool {
        self.selection_sets.get(set).is_some_and(|items| {
            items.iter().any(|item| match item {
                SelectionRef::Field(f) => {
                    let field = &self.fields[*f];
                    field.name == name && field.alias.as_deref().is_none_or(|a| a == name)
                }
                SelectionRef::InlineFragment(_) => false,
            })
        })
    }

    pub fn is_empty_set(&self, set: usize) -> bool {
        self.selection_sets.get(set).is_none_or(Vec::is_empty)
    }

    pub fn fragment_set_for(&self, set: usize, type_condition: &str) -> Option<usize> {
        self.selection_sets.get(set)?.iter().find_map(|item| match item {
            SelectionRef::InlineFragment(i) => {
                let fragment = &self.inline_fragments[*i];
                (fragment.type_condition.as_deref() == Some(type_condition))
                    .then_some(fragment.selection_set)
                    .flatten()
            }
            SelectionRef::Field(_) => None,
        })
    }

    pub fn to_document(&self) -> Document {
        let selection_set = self
            .selection_set
            .map(|set| self.build_selection_set(set))
            .unwrap_or_else(empty_set);
        let variable_definitions = self.variable_definitions.clone();
        let operation = match self.kind {
            OperationKind::Query => OperationDefinition::Query(Query {
                position: pos(),
                name: None,
                variable_definitions,
                directives: Vec::new(),
                selection_set,
            }),
            OperationKind::Mutation => OperationDefinition::Mutation(Mutation {
                position: pos(),
                name: None,
                variable_definitions,
                directives: Vec::new(),
                selection_set,
            }),
            OperationKind::Subscription => OperationDefinition::Subscription(Subscription {
                position: pos(),
                name: None,
                variable_definitions,
                directives: Vec::new(),
                selection_set,
            }),
        };
        Document {
            definitions: vec![Definition::Operation(operation)],
        }
    }

    fn build_selection_set(&self, set: usize) -> SelectionSet {
        let items = self.selection_sets[set]
            .iter()
            .map(|item| match item {
                SelectionRef::Field(f) => {
                    let field = &self.fields[*f];
                    Selection::Field(Field {
                        position: pos(),
                        alias: field.alias.clone(),
                        name: field.name.clone(),
                        arguments: field.arguments.clone(),
                        directives: Vec::new(),
                        selection_set: field
                            .selection_set
                            .map(|s| self.build_selection_set(s))
                            .unwrap_or_else(empty_set),
                    })
                }
                SelectionRef::InlineFragment(i) => {
                    let fragment = &self.inline_fragments[*i];
                    Selection::InlineFragment(InlineFragment {
                        position: pos(),
                        type_condition: fragment.type_condition.clone().map(TypeCondition::On),
                        directives: Vec::new(),
                        selection_set: fragment
                            .selection_set
                            .map(|s| self.build_selection_set(s))
                            .unwrap_or_else(empty_set),
                    })
                }
            })
            .collect();
        SelectionSet {
            span: (pos(), pos()),
            items,
        }
    }
}

fn empty_set() -> SelectionSet {
    SelectionSet {
        span: (pos(), pos()),
        items: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::print_document;
    use graphql_parser::query::Type;

    #[test]
    fn builds_entity_operation() {
        let mut op = UpstreamOperation::new(OperationKind::Query);
        let root = op.attach_selection_set(Node::OperationRoot).unwrap();
        op.add_variable_definition(
            "representations",
            Type::NonNullType(Box::new(Type::ListType(Box::new(Type::NonNullType(
                Box::new(Type::NamedType("_Any".to_string())),
            ))))),
        );
        let entities = op.add_field(root, None, "_entities");
        op.add_argument(entities, "representations", Value::Variable("representations".into()));
        let entities_set = op.attach_selection_set(Node::Field(entities)).unwrap();
        let fragment = op.add_inline_fragment(entities_set, Some("User".into()));
        let fragment_set = op.attach_selection_set(Node::InlineFragment(fragment)).unwrap();
        op.add_field(fragment_set, None, "name");

        assert_eq!(op.fragment_set_for(entities_set, "User"), Some(fragment_set));
        assert!(op.selects(fragment_set, "name"));
        assert_eq!(
            print_document(&op.to_document()),
            "query($representations: [_Any!]!){_entities(representations: $representations){... on User {name}}}"
        );
    }
}

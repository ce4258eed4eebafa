use graphql_parser::Pos;
use graphql_parser::query::{
    Definition, FragmentDefinition, InlineFragment, OperationDefinition, Query, Selection,
    TypeCondition,
};
use std::collections::{HashMap, HashSet};

use crate::error::PlanningError;
use crate::schema::{OperationKind, SchemaIndex};
use crate::walker::{Document, SelectionSet, Value, VariableDefinition};

/// Variables extracted from literal arguments, in extraction order.
pub type ExtractedVariables = Vec<(String, serde_json::Value)>;

/// Normalizes an upstream operation against its schema: fragment spreads are inlined and their
/// definitions removed, duplicate leaf selections dropped, literal arguments extracted into
/// variables and unused variable definitions removed. Unknown fields fail normalization.
pub fn normalize(
    mut document: Document,
    schema: &SchemaIndex,
) -> Result<(Document, ExtractedVariables), PlanningError> {
    let fragments: HashMap<String, FragmentDefinition<'static, String>> = document
        .definitions
        .iter()
        .filter_map(|d| match d {
            Definition::Fragment(f) => Some((f.name.clone(), f.clone())),
            Definition::Operation(_) => None,
        })
        .collect();
    document
        .definitions
        .retain(|d| matches!(d, Definition::Operation(_)));

    let mut extracted = Vec::new();
    for definition in &mut document.definitions {
        let Definition::Operation(op) = definition else {
            continue;
        };
        let kind = operation_kind(op);
        let root_type = schema.root_type_name(kind).to_string();

        let Some((variables, set)) = operation_parts_mut(op) else {
            continue;
        };
        inline_fragment_spreads(set, &fragments, &mut Vec::new())?;
        validate_selection_set(set, &root_type, schema)?;
        dedupe_leaf_selections(set);

        let mut names: HashSet<String> = variables.iter().map(|v| v.name.clone()).collect();
        let mut new_definitions = Vec::new();
        extract_arguments(set, &root_type, schema, &mut names, &mut new_definitions, &mut extracted)?;
        variables.extend(new_definitions);

        let mut used = HashSet::new();
        collect_used_variables(set, &mut used);
        variables.retain(|v| used.contains(&v.name));
    }

    Ok((document, extracted))
}

pub(crate) fn pos() -> Pos {
    Pos { line: 1, column: 1 }
}

fn operation_kind(op: &OperationDefinition<'static, String>) -> OperationKind {
    match op {
        OperationDefinition::SelectionSet(_) | OperationDefinition::Query(_) => {
            OperationKind::Query
        }
        OperationDefinition::Mutation(_) => OperationKind::Mutation,
        OperationDefinition::Subscription(_) => OperationKind::Subscription,
    }
}

// Shorthand `{ ... }` operations are promoted to anonymous queries so variables can be added.
fn operation_parts_mut<'d>(
    op: &'d mut OperationDefinition<'static, String>,
) -> Option<(&'d mut Vec<VariableDefinition>, &'d mut SelectionSet)> {
    if let OperationDefinition::SelectionSet(set) = op {
        let selection_set = std::mem::replace(
            set,
            SelectionSet {
                span: (pos(), pos()),
                items: Vec::new(),
            },
        );
        *op = OperationDefinition::Query(Query {
            position: pos(),
            name: None,
            variable_definitions: Vec::new(),
            directives: Vec::new(),
            selection_set,
        });
    }
    match op {
        OperationDefinition::Query(q) => Some((&mut q.variable_definitions, &mut q.selection_set)),
        OperationDefinition::Mutation(m) => {
            Some((&mut m.variable_definitions, &mut m.selection_set))
        }
        OperationDefinition::Subscription(s) => {
            Some((&mut s.variable_definitions, &mut s.selection_set))
        }
        OperationDefinition::SelectionSet(_) => None,
    }
}

fn inline_fragment_spreads<'f>(
    set: &mut SelectionSet,
    fragments: &'f HashMap<String, FragmentDefinition<'static, String>>,
    visiting: &mut Vec<&'f str>,
) -> Result<(), PlanningError> {
    for selection in &mut set.items {
        if let Selection::FragmentSpread(spread) = selection {
            let (name, fragment) = fragments
                .get_key_value(&spread.fragment_name)
                .ok_or_else(|| {
                    PlanningError::Normalization(format!(
                        "fragment {} is not defined",
                        spread.fragment_name
                    ))
                })?;
            if visiting.contains(&name.as_str()) {
                return Err(PlanningError::Normalization(format!(
                    "fragment {name} spreads itself"
                )));
            }
            let TypeCondition::On(type_condition) = &fragment.type_condition;
            let mut inner = fragment.selection_set.clone();
            visiting.push(name.as_str());
            inline_fragment_spreads(&mut inner, fragments, visiting)?;
            visiting.pop();
            let replacement = Selection::InlineFragment(InlineFragment {
                position: spread.position,
                type_condition: Some(TypeCondition::On(type_condition.clone())),
                directives: spread.directives.clone(),
                selection_set: inner,
            });
            *selection = replacement;
            continue;
        }
        match selection {
            Selection::Field(field) => {
                inline_fragment_spreads(&mut field.selection_set, fragments, visiting)?
            }
            Selection::InlineFragment(fragment) => {
                inline_fragment_spreads(&mut fragment.selection_set, fragments, visiting)?
            }
            Selection::FragmentSpread(_) => {}
        }
    }
    Ok(())
}

fn validate_selection_set(
    set: &SelectionSet,
    type_name: &str,
    schema: &SchemaIndex,
) -> Result<(), PlanningError> {
    for selection in &set.items {
        match selection {
            Selection::Field(field) => {
                let field_type = schema.field_type_name(type_name, &field.name).ok_or_else(|| {
                    PlanningError::Normalization(format!(
                        "field: {} not defined on type: {}",
                        field.name, type_name
                    ))
                })?;
                validate_selection_set(&field.selection_set, &field_type, schema)?;
            }
            Selection::InlineFragment(fragment) => {
                let inner_type = match &fragment.type_condition {
                    Some(TypeCondition::On(t)) if !schema.has_type(t) => {
                        return Err(PlanningError::Normalization(format!(
                            "unknown type in fragment type condition: {t}"
                        )));
                    }
                    Some(TypeCondition::On(t)) => t.as_str(),
                    None => type_name,
                };
                validate_selection_set(&fragment.selection_set, inner_type, schema)?;
            }
            Selection::FragmentSpread(_) => {}
        }
    }
    Ok(())
}

fn dedupe_leaf_selections(set: &mut SelectionSet) {
    let mut kept: Vec<Selection<'static, String>> = Vec::with_capacity(set.items.len());
    for mut selection in set.items.drain(..) {
        match &mut selection {
            Selection::Field(field) if field.selection_set.items.is_empty() => {
                let duplicate = kept.iter().any(|k| match k {
                    Selection::Field(other) => {
                        other.selection_set.items.is_empty()
                            && other.alias == field.alias
                            && other.name == field.name
                            && other.arguments == field.arguments
                            && other.directives == field.directives
                    }
                    _ => false,
                });
                if duplicate {
                    continue;
                }
            }
            Selection::Field(field) => dedupe_leaf_selections(&mut field.selection_set),
            Selection::InlineFragment(fragment) => {
                dedupe_leaf_selections(&mut fragment.selection_set)
            }
            Selection::FragmentSpread(_) => {}
        }
        kept.push(selection);
    }
    set.items = kept;
}

fn extract_arguments(
    set: &mut SelectionSet,
    type_name: &str,
    schema: &SchemaIndex,
    names: &mut HashSet<String>,
    definitions: &mut Vec<VariableDefinition>,
    extracted: &mut ExtractedVariables,
) -> Result<(), PlanningError> {
    for selection in &mut set.items {
        match selection {
            Selection::Field(field) => {
                for (arg_name, value) in &mut field.arguments {
                    if contains_variable(value) {
                        continue;
                    }
                    let argument = schema.argument(type_name, &field.name, arg_name).ok_or_else(|| {
                        PlanningError::Normalization(format!(
                            "argument: {} not defined on field: {}.{}",
                            arg_name, type_name, field.name
                        ))
                    })?;
                    let variable_name = generate_unused_name(names);
                    extracted.push((variable_name.clone(), to_json(value)));
                    definitions.push(VariableDefinition {
                        position: pos(),
                        name: variable_name.clone(),
                        var_type: argument.ty.clone(),
                        default_value: None,
                    });
                    *value = Value::Variable(variable_name);
                }
                if let Some(field_type) = schema.field_type_name(type_name, &field.name) {
                    extract_arguments(&mut field.selection_set, &field_type, schema, names, definitions, extracted)?;
                }
            }
            Selection::InlineFragment(fragment) => {
                let inner_type = match &fragment.type_condition {
                    Some(TypeCondition::On(t)) => t.clone(),
                    None => type_name.to_string(),
                };
                extract_arguments(&mut fragment.selection_set, &inner_type, schema, names, definitions, extracted)?;
            }
            Selection::FragmentSpread(_) => {}
        }
    }
    Ok(())
}

/// Next name in `a`, `b`, ... `z`, `aa`, `ab`, ... not already taken.
pub fn generate_unused_name(names: &mut HashSet<String>) -> String {
    let mut index = 0usize;
    loop {
        let mut n = index;
        let mut name = String::new();
        loop {
            name.insert(0, (b'a' + (n % 26) as u8) as char);
            if n < 26 {
                break;
            }
            n = n / 26 - 1;
        }
        if names.insert(name.clone()) {
            return name;
        }
        index += 1;
    }
}

pub fn contains_variable(value: &Value) -> bool {
    match value {
        Value::Variable(_) => true,
        Value::List(items) => items.iter().any(contains_variable),
        Value::Object(fields) => fields.values().any(contains_variable),
        _ => false,
    }
}

pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Variable(_) | Value::Null => serde_json::Value::Null,
        Value::Int(n) => n.as_i64().map(Into::into).unwrap_or(serde_json::Value::Null),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Enum(e) => serde_json::Value::String(e.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}

fn collect_used_variables(set: &SelectionSet, used: &mut HashSet<String>) {
    for selection in &set.items {
        match selection {
            Selection::Field(field) => {
                for (_, value) in &field.arguments {
                    collect_value_variables(value, used);
                }
                for directive in &field.directives {
                    for (_, value) in &directive.arguments {
                        collect_value_variables(value, used);
                    }
                }
                collect_used_variables(&field.selection_set, used);
            }
            Selection::InlineFragment(fragment) => {
                collect_used_variables(&fragment.selection_set, used)
            }
            Selection::FragmentSpread(_) => {}
        }
    }
}

fn collect_value_variables(value: &Value, used: &mut HashSet<String>) {
    match value {
        Value::Variable(name) => {
            used.insert(name.clone());
        }
        Value::List(items) => items.iter().for_each(|v| collect_value_variables(v, used)),
        Value::Object(fields) => fields.values().for_each(|v| collect_value_variables(v, used)),
        _ => {}
    }
}

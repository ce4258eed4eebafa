use graphql_parser::query::{
    Definition, Directive, OperationDefinition, Selection, TypeCondition, VariableDefinition,
};
use std::fmt::Write;

use crate::walker::{Document, Field, SelectionSet, Value};

/// Prints a document in the compact single-line form sent upstream,
/// e.g. `query($id: ID!){droid(id: $id){name friends {name}}}`.
pub fn print_document(document: &Document) -> String {
    let mut out = String::new();
    for (i, definition) in document.definitions.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        match definition {
            Definition::Operation(op) => print_operation(&mut out, op),
            Definition::Fragment(fragment) => {
                let TypeCondition::On(type_condition) = &fragment.type_condition;
                let _ = write!(out, "fragment {} on {}", fragment.name, type_condition);
                print_directives(&mut out, &fragment.directives);
                out.push(' ');
                print_selection_set(&mut out, &fragment.selection_set);
            }
        }
    }
    out
}

fn print_operation(out: &mut String, op: &OperationDefinition<'static, String>) {
    let (keyword, name, variables, directives, set) = match op {
        OperationDefinition::SelectionSet(set) => {
            print_selection_set(out, set);
            return;
        }
        OperationDefinition::Query(q) => (
            "query",
            &q.name,
            &q.variable_definitions,
            &q.directives,
            &q.selection_set,
        ),
        OperationDefinition::Mutation(m) => (
            "mutation",
            &m.name,
            &m.variable_definitions,
            &m.directives,
            &m.selection_set,
        ),
        OperationDefinition::Subscription(s) => (
            "subscription",
            &s.name,
            &s.variable_definitions,
            &s.directives,
            &s.selection_set,
        ),
    };

    if keyword == "query" && name.is_none() && variables.is_empty() && directives.is_empty() {
        print_selection_set(out, set);
        return;
    }

    out.push_str(keyword);
    if let Some(name) = name {
        out.push(' ');
        out.push_str(name);
    }
    if !variables.is_empty() {
        out.push('(');
        for (i, variable) in variables.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            print_variable_definition(out, variable);
        }
        out.push(')');
    }
    print_directives(out, directives);
    if variables.is_empty() {
        out.push(' ');
    }
    print_selection_set(out, set);
}

fn print_variable_definition(out: &mut String, variable: &VariableDefinition<'static, String>) {
    let _ = write!(out, "${}: {}", variable.name, variable.var_type);
    if let Some(default) = &variable.default_value {
        out.push_str(" = ");
        print_value(out, default);
    }
}

pub fn print_selection_set(out: &mut String, set: &SelectionSet) {
    out.push('{');
    for (i, selection) in set.items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        match selection {
            Selection::Field(field) => print_field(out, field),
            Selection::InlineFragment(fragment) => {
                out.push_str("...");
                if let Some(TypeCondition::On(type_condition)) = &fragment.type_condition {
                    out.push_str(" on ");
                    out.push_str(type_condition);
                }
                print_directives(out, &fragment.directives);
                out.push(' ');
                print_selection_set(out, &fragment.selection_set);
            }
            Selection::FragmentSpread(spread) => {
                out.push_str("...");
                out.push_str(&spread.fragment_name);
                print_directives(out, &spread.directives);
            }
        }
    }
    out.push('}');
}

fn print_field(out: &mut String, field: &Field) {
    if let Some(alias) = &field.alias {
        out.push_str(alias);
        out.push_str(": ");
    }
    out.push_str(&field.name);
    print_arguments(out, &field.arguments);
    print_directives(out, &field.directives);
    if !field.selection_set.items.is_empty() {
        if field.arguments.is_empty() {
            out.push(' ');
        }
        print_selection_set(out, &field.selection_set);
    }
}

fn print_arguments(out: &mut String, arguments: &[(String, Value)]) {
    if arguments.is_empty() {
        return;
    }
    out.push('(');
    for (i, (name, value)) in arguments.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(name);
        out.push_str(": ");
        print_value(out, value);
    }
    out.push(')');
}

fn print_directives(out: &mut String, directives: &[Directive<'static, String>]) {
    for directive in directives {
        out.push_str(" @");
        out.push_str(&directive.name);
        print_arguments(out, &directive.arguments);
    }
}

pub fn print_value(out: &mut String, value: &Value) {
    match value {
        Value::Variable(name) => {
            out.push('$');
            out.push_str(name);
        }
        Value::Int(n) => {
            let _ = write!(out, "{}", n.as_i64().unwrap_or_default());
        }
        Value::Float(f) => {
            let _ = write!(out, "{f}");
        }
        Value::String(s) => out.push_str(&serde_json::Value::String(s.clone()).to_string()),
        Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
        Value::Enum(e) => out.push_str(e),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                print_value(out, item);
            }
            out.push(']');
        }
        Value::Object(fields) => {
            out.push('{');
            for (i, (name, item)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(name);
                out.push_str(": ");
                print_value(out, item);
            }
            out.push('}');
        }
    }
}

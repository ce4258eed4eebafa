use http::HeaderMap;
use serde_json::Value;

use crate::error::FetchError;

/// JSON shape a rendered variable must take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JsonValueType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

/// A value the executor substitutes into an upstream input at request time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Variable {
    /// Read from the client supplied variables.
    Context {
        path: Vec<String>,
        value_type: JsonValueType,
    },
    /// Read from the parent object resolved by an earlier fetch.
    Object {
        path: Vec<String>,
        value_type: JsonValueType,
    },
    /// Read from the client request headers.
    Header { path: Vec<String> },
}

impl Variable {
    fn same_source(&self, other: &Variable) -> bool {
        match (self, other) {
            (Variable::Context { path: a, .. }, Variable::Context { path: b, .. }) => a == b,
            (Variable::Object { path: a, .. }, Variable::Object { path: b, .. }) => a == b,
            (Variable::Header { path: a }, Variable::Header { path: b }) => a == b,
            _ => false,
        }
    }

    fn render(&self, ctx: &RenderContext<'_>) -> String {
        match self {
            Variable::Context { path, value_type } => {
                render_json(lookup(ctx.variables, path), *value_type)
            }
            Variable::Object { path, value_type } => {
                render_json(ctx.object.and_then(|o| lookup(o, path)), *value_type)
            }
            Variable::Header { path } => {
                let value = path
                    .first()
                    .and_then(|name| ctx.headers.get(name.as_str()))
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                // rendered inside an existing JSON string
                let quoted = Value::String(value.to_string()).to_string();
                quoted[1..quoted.len() - 1].to_string()
            }
        }
    }
}

pub fn placeholder(index: usize) -> String {
    format!("$${index}$$")
}

/// Ordered list of variables, deduplicated by kind and path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Variables(Vec<Variable>);

impl Variables {
    pub fn new() -> Self {
        Variables(Vec::new())
    }

    /// Returns the placeholder for `variable` and whether it was already present.
    pub fn add_variable(&mut self, variable: Variable) -> (String, bool) {
        if let Some(index) = self.0.iter().position(|v| v.same_source(&variable)) {
            return (placeholder(index), true);
        }
        self.0.push(variable);
        (placeholder(self.0.len() - 1), false)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.0.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Variable> {
        self.0.get(index)
    }
}

/// Sources a template's placeholders are resolved from.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub variables: &'a Value,
    pub headers: &'a HeaderMap,
    pub object: Option<&'a Value>,
}

impl<'a> RenderContext<'a> {
    pub fn new(variables: &'a Value, headers: &'a HeaderMap) -> Self {
        RenderContext {
            variables,
            headers,
            object: None,
        }
    }

    pub fn with_object(self, object: &'a Value) -> Self {
        RenderContext {
            object: Some(object),
            ..self
        }
    }
}

/// A fetch or subscription input with `$$n$$` placeholders into `variables`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputTemplate {
    pub input: String,
    pub variables: Variables,
}

impl InputTemplate {
    pub fn render(&self, ctx: &RenderContext<'_>) -> Result<String, FetchError> {
        let mut out = String::with_capacity(self.input.len());
        let mut rest = self.input.as_str();

        while let Some(start) = rest.find("$$") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let digits = after.bytes().take_while(u8::is_ascii_digit).count();
            if digits == 0 || !after[digits..].starts_with("$$") {
                out.push_str("$$");
                rest = after;
                continue;
            }

            let index: usize = after[..digits]
                .parse()
                .map_err(|_| FetchError::Render(after[..digits].to_string()))?;
            let variable = self
                .variables
                .get(index)
                .ok_or_else(|| FetchError::Render(format!("no variable at index {index}")))?;
            out.push_str(&variable.render(ctx));
            rest = &after[digits + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn lookup<'v>(value: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn render_json(value: Option<&Value>, value_type: JsonValueType) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        // ID and custom string scalars accept numbers from clients
        Some(Value::Number(n)) if value_type == JsonValueType::String => {
            Value::String(n.to_string()).to_string()
        }
        Some(v) => v.to_string(),
    }
}

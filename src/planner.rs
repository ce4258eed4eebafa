use graphql_parser::query::Type;
use tracing::{debug, error};

use crate::config::{ArgumentConfiguration, ArgumentSource, DataSourceConfiguration, EngineConfiguration};
use crate::error::PlanningError;
use crate::federation::{FederationMetadata, build_federation_schema};
use crate::normalizer::{generate_unused_name, normalize};
use crate::printer::print_document;
use crate::schema::{OperationKind, SchemaIndex, SchemaType, rename_named_type};
use crate::subscription::SubscriptionProtocol;
use crate::upstream::{Node, UpstreamOperation};
use crate::variables::{InputTemplate, JsonValueType, Variable, Variables};
use crate::walker::{AncestorKind, Field, SelectionSet, Value, Visitor, WalkContext};

/// Key fields a nested fetch needs from the object this planner resolves at `path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequiredFields {
    pub path: Vec<String>,
    pub type_name: String,
    pub fields: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    pub allow_batch: bool,
}

/// Upstream HTTP call planned for one data source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchConfiguration {
    pub data_source: String,
    pub input: InputTemplate,
    pub disallow_single_flight: bool,
    pub extract_entities: bool,
    pub batch: Option<BatchConfig>,
}

/// Upstream subscription planned for one data source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionConfiguration {
    pub data_source: String,
    pub input: InputTemplate,
    pub protocol: Option<SubscriptionProtocol>,
}

/// Builds the upstream operation for one data source while the client operation is walked.
pub struct Planner<'a> {
    engine: &'a EngineConfiguration,
    data_source: &'a DataSourceConfiguration,
    is_nested: bool,
    required_fields: Vec<RequiredFields>,

    upstream: UpstreamOperation,
    nodes: Vec<Node>,
    frames: Vec<usize>,
    variables: Variables,
    upstream_variables: Vec<(String, String)>,
    federation: Option<FederationMetadata>,
    upstream_schema: Option<SchemaIndex>,
    disallow_single_flight: bool,
    has_federation_root: bool,
    federation_path_len: usize,
    entities_set: Option<usize>,
    representation_typename: Option<String>,
    representation: Vec<(String, String)>,
    extract_entities: bool,
    root_type_name: Option<String>,
    root_field_name: Option<String>,
}

impl<'a> Planner<'a> {
    pub fn new(
        engine: &'a EngineConfiguration,
        data_source: &'a DataSourceConfiguration,
        is_nested: bool,
        required_fields: Vec<RequiredFields>,
    ) -> Self {
        Planner {
            engine,
            data_source,
            is_nested,
            required_fields,
            upstream: UpstreamOperation::new(OperationKind::Query),
            nodes: Vec::new(),
            frames: Vec::new(),
            variables: Variables::new(),
            upstream_variables: Vec::new(),
            federation: None,
            upstream_schema: None,
            disallow_single_flight: false,
            has_federation_root: false,
            federation_path_len: 0,
            entities_set: None,
            representation_typename: None,
            representation: Vec::new(),
            extract_entities: false,
            root_type_name: None,
            root_field_name: None,
        }
    }

    /// Alias to send upstream for a field whose configured path renames it.
    /// Only returns one when the field has no alias and a single element path differs from its name.
    pub fn downstream_response_field_alias(&self, type_name: &str, field: &Field) -> Option<String> {
        if field.alias.is_some() {
            return None;
        }
        let config = self.engine.field_configuration(type_name, &field.name)?;
        match config.path.as_slice() {
            [upstream_name] if *upstream_name != field.name => Some(field.name.clone()),
            _ => None,
        }
    }

    fn push(&mut self, node: Node) {
        self.nodes.push(node);
        if let Some(frame) = self.frames.last_mut() {
            *frame += 1;
        }
    }

    fn open_frame(&mut self) {
        self.frames.push(0);
    }

    fn close_frame(&mut self) {
        let pushed = self.frames.pop().unwrap_or_default();
        let len = self.nodes.len().saturating_sub(pushed);
        self.nodes.truncate(len);
    }

    fn current_selection_set(&self) -> Option<usize> {
        match self.nodes.last() {
            Some(Node::SelectionSet(set)) => Some(*set),
            _ => None,
        }
    }

    fn has_field_ancestor(&self) -> bool {
        self.nodes.iter().any(|n| matches!(n, Node::Field(_)))
    }

    fn is_nested_request(&self, ctx: &WalkContext<'_>) -> bool {
        !self.has_field_ancestor() && ctx.selection_set_depth() >= 2
    }

    fn rename_type<'t>(&'t self, type_name: &'t str) -> &'t str {
        self.engine.rename_type(type_name)
    }

    fn handle_federation(&mut self, ctx: &mut WalkContext<'_>, field_name: &str) {
        if self.federation.is_none() {
            return;
        }
        if !self.has_federation_root {
            if !self.is_nested_request(ctx) {
                return;
            }
            let Some(set) = self.current_selection_set() else {
                return;
            };
            self.has_federation_root = true;
            self.federation_path_len = ctx.path().len();

            // query($representations: [_Any!]!){_entities(representations: $representations){
            self.upstream.add_variable_definition("representations", representations_type());
            let entities = self.upstream.add_field(set, None, "_entities");
            self.upstream.add_argument(
                entities,
                "representations",
                Value::Variable("representations".to_string()),
            );
            self.entities_set = self.upstream.attach_selection_set(Node::Field(entities));
        }

        if ctx.path().len() != self.federation_path_len {
            return;
        }
        let Some(entities_set) = self.entities_set else {
            return;
        };

        // ... on Type {
        let type_name = self.rename_type(ctx.enclosing_type_name()).to_string();
        let fragment_set = match self.upstream.fragment_set_for(entities_set, &type_name) {
            Some(set) => set,
            None => {
                let fragment = self
                    .upstream
                    .add_inline_fragment(entities_set, Some(type_name.clone()));
                match self.upstream.attach_selection_set(Node::InlineFragment(fragment)) {
                    Some(set) => set,
                    None => return,
                }
            }
        };
        if self.current_selection_set() != Some(fragment_set) {
            self.push(Node::SelectionSet(fragment_set));
        }

        self.update_representation(ctx, field_name);
    }

    fn update_representation(&mut self, ctx: &mut WalkContext<'_>, field_name: &str) {
        let enclosing = ctx.enclosing_type_name().to_string();
        let required = match &self.federation {
            Some(federation) => federation.required_fields(&enclosing, field_name),
            None => return,
        };
        if required.is_empty() {
            debug!(type_name = %enclosing, field = field_name, "no @key for entity type, skipping representation");
            return;
        }

        if self.representation_typename.is_none() {
            // Behind an abstract parent the concrete type comes from the parent response.
            let typename = if ctx.parent_type_is_abstract() {
                let (placeholder, _) = self.variables.add_variable(Variable::Object {
                    path: vec!["__typename".to_string()],
                    value_type: JsonValueType::String,
                });
                placeholder
            } else {
                serde_json::Value::String(self.rename_type(&enclosing).to_string()).to_string()
            };
            self.representation_typename = Some(typename);
        }

        for key in required {
            let Some(field) = ctx.schema.field(&enclosing, &key) else {
                continue;
            };
            let value_type = ctx.schema.json_value_type(&field.ty);
            let (placeholder, exists) = self.variables.add_variable(Variable::Object {
                path: vec![key.clone()],
                value_type,
            });
            if exists {
                continue;
            }
            self.representation.push((key, placeholder));
        }
        self.extract_entities = true;
    }

    fn add_field(&mut self, ctx: &mut WalkContext<'_>, field: &Field) -> Option<usize> {
        let Some(set) = self.current_selection_set() else {
            ctx.stop_with_internal_err(PlanningError::Internal(format!(
                "no selection set to add field {} to",
                field.name
            )));
            return None;
        };
        let enclosing = ctx.enclosing_type_name().to_string();
        let alias = field
            .alias
            .clone()
            .or_else(|| self.downstream_response_field_alias(&enclosing, field));
        let name = match self.engine.field_configuration(&enclosing, &field.name) {
            Some(config) if config.path.len() == 1 => config.path[0].clone(),
            _ => field.name.clone(),
        };

        if self.root_field_name.is_none() {
            self.root_field_name = Some(name.clone());
        }
        Some(self.upstream.add_field(set, alias, &name))
    }

    fn configure_field_argument(
        &mut self,
        ctx: &mut WalkContext<'_>,
        upstream_field: usize,
        field: &Field,
        argument: &ArgumentConfiguration,
        value: &Value,
    ) {
        let Value::Variable(variable_name) = value else {
            // inline values are copied as is, variables nested in lists and objects are imported
            self.upstream
                .add_argument(upstream_field, &argument.name, value.clone());
            self.import_nested_variables(ctx, field, value);
            return;
        };

        let Some(definition) = ctx.variable_definition(variable_name) else {
            ctx.stop_with_internal_err(undefined_variable(variable_name, &field.name));
            return;
        };
        let enclosing = ctx.enclosing_type_name();
        let value_type = match ctx.schema.argument(enclosing, &field.name, &argument.name) {
            Some(arg) => ctx.schema.json_value_type(&arg.ty),
            None => ctx.schema.json_value_type(&definition.var_type),
        };

        let (placeholder, exists) = self.variables.add_variable(Variable::Context {
            path: vec![variable_name.clone()],
            value_type,
        });
        self.upstream
            .add_argument(upstream_field, &argument.name, value.clone());
        if exists {
            return;
        }

        let ty = self.import_type(&definition.var_type, argument.rename_type_to.as_deref());
        self.upstream.add_variable_definition(variable_name, ty);
        self.upstream_variables
            .push((variable_name.clone(), placeholder));
    }

    fn import_nested_variables(&mut self, ctx: &mut WalkContext<'_>, field: &Field, value: &Value) {
        match value {
            Value::Object(fields) => fields
                .values()
                .for_each(|v| self.import_nested_variables(ctx, field, v)),
            Value::List(items) => items
                .iter()
                .for_each(|v| self.import_nested_variables(ctx, field, v)),
            Value::Variable(name) => {
                let Some(definition) = ctx.variable_definition(name) else {
                    ctx.stop_with_internal_err(undefined_variable(name, &field.name));
                    return;
                };
                let (placeholder, exists) = self.variables.add_variable(Variable::Context {
                    path: vec![name.clone()],
                    value_type: ctx.schema.json_value_type(&definition.var_type),
                });
                if exists {
                    return;
                }
                let ty = self.import_type(&definition.var_type, None);
                self.upstream.add_variable_definition(name, ty);
                self.upstream_variables.push((name.clone(), placeholder));
            }
            _ => {}
        }
    }

    fn configure_object_field_source(
        &mut self,
        ctx: &mut WalkContext<'_>,
        upstream_field: usize,
        field: &Field,
        upstream_field_name: &str,
        argument: &ArgumentConfiguration,
    ) {
        if argument.source_path.is_empty() {
            ctx.stop_with_internal_err(PlanningError::Internal(format!(
                "argument {} of {}.{} has no source path",
                argument.name,
                ctx.enclosing_type_name(),
                field.name
            )));
            return;
        }

        let argument_type = self
            .upstream_schema
            .as_ref()
            .and_then(|schema| {
                let query = schema.root_type_name(OperationKind::Query);
                schema
                    .argument(query, upstream_field_name, &argument.name)
                    .map(|a| a.ty.clone())
            })
            .or_else(|| {
                ctx.schema
                    .argument(ctx.enclosing_type_name(), &field.name, &argument.name)
                    .map(|a| a.ty.clone())
            });
        let Some(argument_type) = argument_type else {
            ctx.stop_with_internal_err(PlanningError::Internal(format!(
                "type of argument {} of {}.{} not found",
                argument.name,
                ctx.enclosing_type_name(),
                field.name
            )));
            return;
        };

        let variable_name = generate_unused_name(&mut self.upstream.variable_names());
        self.upstream.add_argument(
            upstream_field,
            &argument.name,
            Value::Variable(variable_name.clone()),
        );
        let ty = self.import_type(&argument_type, argument.rename_type_to.as_deref());
        self.upstream.add_variable_definition(&variable_name, ty);

        let (placeholder, _) = self.variables.add_variable(Variable::Object {
            path: argument.source_path.clone(),
            value_type: ctx.schema.json_value_type(&argument_type),
        });
        self.upstream_variables.push((variable_name, placeholder));
    }

    fn import_type(&self, ty: &SchemaType, rename_type_to: Option<&str>) -> SchemaType {
        let named = crate::schema::named_type(ty);
        let renamed = rename_type_to.unwrap_or_else(|| self.rename_type(named));
        if renamed == named {
            ty.clone()
        } else {
            rename_named_type(ty, renamed)
        }
    }

    fn add_required_fields(&mut self, ctx: &WalkContext<'_>, set: usize) {
        let at_field_set = matches!(
            ctx.ancestors().last(),
            Some(AncestorKind::Field) | Some(AncestorKind::OperationDefinition)
        );
        if !at_field_set {
            return;
        }
        let enclosing = ctx.enclosing_type_name().to_string();
        let required: Vec<RequiredFields> = self
            .required_fields
            .iter()
            .filter(|r| r.path == ctx.path())
            .cloned()
            .collect();

        for requirement in required {
            let target = if requirement.type_name == enclosing {
                set
            } else {
                // entity behind an abstract field
                let type_condition = self.rename_type(&requirement.type_name).to_string();
                let fragment_set = self.upstream.fragment_set_for(set, &type_condition);
                match fragment_set {
                    Some(existing) => existing,
                    None => {
                        if !self.upstream.selects(set, "__typename") {
                            self.upstream.add_field(set, None, "__typename");
                        }
                        let fragment = self.upstream.add_inline_fragment(set, Some(type_condition));
                        match self.upstream.attach_selection_set(Node::InlineFragment(fragment)) {
                            Some(fragment_set) => fragment_set,
                            None => continue,
                        }
                    }
                }
            };
            for field in &requirement.fields {
                if !self.upstream.selects(target, field) {
                    self.upstream.add_field(target, None, field);
                }
            }
        }
    }

    /// Prints the upstream operation, normalized against the data source's schema.
    /// Literal arguments extracted during normalization are returned as JSON values.
    pub fn print_operation(&self) -> Result<(String, Vec<(String, serde_json::Value)>), PlanningError> {
        let base_sdl = self
            .data_source
            .upstream_schema
            .as_deref()
            .unwrap_or(&self.engine.schema);

        let mut schema = if self.federation.is_some() {
            let sdl = build_federation_schema(base_sdl, &self.data_source.federation.service_sdl)?;
            SchemaIndex::parse(&sdl)?
        } else {
            SchemaIndex::parse(base_sdl)?
        };
        self.replace_query_type(&mut schema);

        let (document, extracted) = normalize(self.upstream.to_document(), &schema)?;
        Ok((print_document(&document), extracted))
    }

    // A nested, non federated data source is queried as if its parent type were the query root.
    fn replace_query_type(&self, schema: &mut SchemaIndex) {
        if !self.is_nested || self.federation.is_some() {
            return;
        }
        let (Some(root_type), Some(root_field)) = (&self.root_type_name, &self.root_field_name) else {
            return;
        };
        let query_type = schema.root_type_name(OperationKind::Query).to_string();
        if schema.field(&query_type, root_field).is_some() {
            return;
        }
        schema.replace_query_type(root_type);
    }

    fn body_json(&self, query: &str, extracted: &[(String, serde_json::Value)]) -> String {
        let mut variables: Vec<(String, String)> = Vec::new();
        if self.extract_entities {
            let mut representation = String::from("[{");
            for (i, (key, placeholder)) in self.representation.iter().enumerate() {
                if i > 0 {
                    representation.push(',');
                }
                representation.push_str(&format!("{}:{}", json_string(key), placeholder));
            }
            if let Some(typename) = &self.representation_typename {
                if !self.representation.is_empty() {
                    representation.push(',');
                }
                representation.push_str(&format!("\"__typename\":{typename}"));
            }
            representation.push_str("}]");
            variables.push(("representations".to_string(), representation));
        }
        variables.extend(self.upstream_variables.iter().cloned());
        variables.extend(extracted.iter().map(|(name, value)| (name.clone(), value.to_string())));

        let mut body = format!("{{\"query\":{}", json_string(query));
        if !variables.is_empty() {
            body.push_str(",\"variables\":{");
            for (i, (name, value)) in variables.iter().enumerate() {
                if i > 0 {
                    body.push(',');
                }
                body.push_str(&format!("{}:{}", json_string(name), value));
            }
            body.push('}');
        }
        body.push('}');
        body
    }

    // `{{ .request.headers.Name }}` values become header variables.
    fn header_json(&mut self) -> Option<String> {
        if self.data_source.fetch.header.is_empty() {
            return None;
        }
        let mut header = self.data_source.fetch.header.clone();
        for values in header.values_mut() {
            for value in values.iter_mut() {
                *value = self.template_header_value(value);
            }
        }
        serde_json::to_string(&header).ok()
    }

    fn template_header_value(&mut self, value: &str) -> String {
        let mut out = String::new();
        let mut rest = value;
        while let Some(start) = rest.find("{{") {
            let Some(end) = rest[start..].find("}}") else {
                break;
            };
            out.push_str(&rest[..start]);
            let expression = rest[start + 2..start + end].trim();
            match expression.strip_prefix(".request.headers.") {
                Some(name) => {
                    let (placeholder, _) = self.variables.add_variable(Variable::Header {
                        path: vec![name.to_string()],
                    });
                    out.push_str(&placeholder);
                }
                None => out.push_str(&rest[start..start + end + 2]),
            }
            rest = &rest[start + end + 2..];
        }
        out.push_str(rest);
        out
    }

    pub fn configure_fetch(&mut self) -> Result<FetchConfiguration, PlanningError> {
        let (query, extracted) = self.print_operation()?;
        let body = self.body_json(&query, &extracted);
        let header = self.header_json();

        let mut input = format!(
            "{{\"method\":{},\"url\":{}",
            json_string(&self.data_source.fetch.method),
            json_string(&self.data_source.fetch.url)
        );
        if let Some(header) = header {
            input.push_str(&format!(",\"header\":{header}"));
        }
        input.push_str(&format!(",\"body\":{body}"));
        if self.extract_entities {
            input.push_str(",\"extract_entities\":true");
        }
        input.push('}');

        Ok(FetchConfiguration {
            data_source: self.data_source.name.clone(),
            input: InputTemplate {
                input,
                variables: self.variables.clone(),
            },
            disallow_single_flight: self.disallow_single_flight,
            extract_entities: self.extract_entities,
            batch: self.extract_entities.then_some(BatchConfig { allow_batch: true }),
        })
    }

    pub fn configure_subscription(&mut self) -> Result<SubscriptionConfiguration, PlanningError> {
        let subscription = self.data_source.subscription.clone().unwrap_or_default();
        let url = if subscription.url.is_empty() {
            self.data_source.fetch.url.clone()
        } else {
            subscription.url.clone()
        };

        let (query, extracted) = self.print_operation()?;
        let body = self.body_json(&query, &extracted);
        let header = self.header_json();

        let mut input = format!("{{\"url\":{}", json_string(&url));
        if let Some(header) = header {
            input.push_str(&format!(",\"header\":{header}"));
        }
        input.push_str(&format!(",\"body\":{body}"));
        if subscription.protocol == Some(SubscriptionProtocol::Sse) {
            input.push_str(",\"use_sse\":true");
            if subscription.sse_method_post {
                input.push_str(",\"sse_method_post\":true");
            }
        }
        input.push('}');

        Ok(SubscriptionConfiguration {
            data_source: self.data_source.name.clone(),
            input: InputTemplate {
                input,
                variables: self.variables.clone(),
            },
            protocol: subscription.protocol,
        })
    }
}

fn undefined_variable(name: &str, field_name: &str) -> PlanningError {
    PlanningError::Internal(format!(
        "variable ${name} used by field {field_name} is not defined"
    ))
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn representations_type() -> SchemaType {
    Type::NonNullType(Box::new(Type::ListType(Box::new(Type::NonNullType(
        Box::new(Type::NamedType("_Any".to_string())),
    )))))
}

impl Visitor for Planner<'_> {
    fn enter_document(&mut self, ctx: &mut WalkContext<'_>) {
        self.upstream = UpstreamOperation::new(OperationKind::Query);
        self.nodes.clear();
        self.frames.clear();
        self.variables = Variables::new();
        self.upstream_variables.clear();
        self.representation.clear();
        self.representation_typename = None;
        self.disallow_single_flight = false;
        self.has_federation_root = false;
        self.federation_path_len = 0;
        self.entities_set = None;
        self.extract_entities = false;
        self.root_type_name = None;
        self.root_field_name = None;
        self.federation = None;
        self.upstream_schema = None;

        if self.data_source.federation.enabled {
            match FederationMetadata::parse(&self.data_source.federation.service_sdl) {
                Ok(metadata) => self.federation = Some(metadata),
                Err(err) => {
                    error!(data_source = %self.data_source.name, %err, "failed parsing federation SDL");
                    ctx.stop_with_internal_err(err);
                    return;
                }
            }
        }
        if let Some(sdl) = &self.data_source.upstream_schema {
            match SchemaIndex::parse(sdl) {
                Ok(schema) => self.upstream_schema = Some(schema),
                Err(err) => ctx.stop_with_internal_err(err),
            }
        }
    }

    fn enter_operation_definition(&mut self, ctx: &mut WalkContext<'_>) {
        let kind = if self.is_nested {
            OperationKind::Query
        } else {
            ctx.operation_kind()
        };
        self.upstream = UpstreamOperation::new(kind);
        self.disallow_single_flight = kind == OperationKind::Mutation;
        self.open_frame();
        self.push(Node::OperationRoot);
    }

    fn leave_operation_definition(&mut self, _ctx: &mut WalkContext<'_>) {
        self.close_frame();
    }

    fn enter_selection_set(&mut self, ctx: &mut WalkContext<'_>, set: &SelectionSet) {
        self.open_frame();
        let Some(parent) = self.nodes.last().copied() else {
            return;
        };
        // entering a nested abstract root walks through its inline fragments in place
        if matches!(parent, Node::SelectionSet(_)) {
            return;
        }
        let Some(upstream_set) = self.upstream.attach_selection_set(parent) else {
            return;
        };
        self.push(Node::SelectionSet(upstream_set));

        if ctx.enclosing_type_is_abstract() || (self.is_nested && parent == Node::OperationRoot) {
            return;
        }
        let selects_typename = set.items.iter().any(|item| {
            matches!(item, graphql_parser::query::Selection::Field(f) if f.name == "__typename" && f.alias.is_none())
        });
        if selects_typename {
            self.upstream.add_field(upstream_set, None, "__typename");
        }
    }

    fn leave_selection_set(&mut self, ctx: &mut WalkContext<'_>, _set: &SelectionSet) {
        if let Some(set) = self.current_selection_set() {
            self.add_required_fields(ctx, set);
            if self.upstream.is_empty_set(set) {
                self.upstream.add_field(set, None, "__typename");
            }
        }
        self.close_frame();
    }

    fn enter_inline_fragment(&mut self, _ctx: &mut WalkContext<'_>, type_condition: Option<&str>) {
        self.open_frame();
        // federated entry fragments become `... on Type` inside `_entities`
        if self.federation.is_some() && self.is_nested && !self.has_field_ancestor() {
            return;
        }
        let Some(type_condition) = type_condition else {
            return;
        };
        let Some(set) = self.current_selection_set() else {
            return;
        };
        if !self.upstream.selects(set, "__typename") {
            self.upstream.add_field(set, None, "__typename");
        }
        let type_condition = self.rename_type(type_condition).to_string();
        let fragment = self.upstream.add_inline_fragment(set, Some(type_condition));
        self.push(Node::InlineFragment(fragment));
    }

    fn leave_inline_fragment(&mut self, _ctx: &mut WalkContext<'_>, _type_condition: Option<&str>) {
        self.close_frame();
    }

    fn enter_field(&mut self, ctx: &mut WalkContext<'_>, field: &Field) {
        if field.name == "__typename" && field.alias.is_none() {
            if let Some(set) = self.current_selection_set() {
                if self.upstream.selects(set, "__typename") {
                    self.open_frame();
                    return;
                }
            }
        }

        if self.root_type_name.is_none() {
            self.root_type_name = Some(ctx.enclosing_type_name().to_string());
        }

        self.handle_federation(ctx, &field.name);
        let Some(upstream_field) = self.add_field(ctx, field) else {
            self.open_frame();
            return;
        };
        self.open_frame();
        self.push(Node::Field(upstream_field));

        let enclosing = ctx.enclosing_type_name().to_string();
        let Some(config) = self.engine.field_configuration(&enclosing, &field.name) else {
            return;
        };
        let upstream_name = match config.path.as_slice() {
            [name] => name.clone(),
            _ => field.name.clone(),
        };
        for argument in &config.arguments {
            if argument.source_type == ArgumentSource::ObjectField {
                self.configure_object_field_source(ctx, upstream_field, field, &upstream_name, argument);
            }
        }
    }

    fn enter_argument(&mut self, ctx: &mut WalkContext<'_>, field: &Field, name: &str, value: &Value) {
        let Some(Node::Field(upstream_field)) = self.nodes.last().copied() else {
            return;
        };
        let enclosing = ctx.enclosing_type_name().to_string();
        let argument = match self.engine.field_configuration(&enclosing, &field.name) {
            Some(config) => match config
                .arguments
                .iter()
                .find(|a| a.name == name && a.source_type == ArgumentSource::FieldArgument)
            {
                Some(argument) => argument.clone(),
                None => return,
            },
            // without a field configuration every client argument is forwarded
            None => ArgumentConfiguration {
                name: name.to_string(),
                ..Default::default()
            },
        };
        self.configure_field_argument(ctx, upstream_field, field, &argument, value);
    }

    fn leave_field(&mut self, _ctx: &mut WalkContext<'_>, _field: &Field) {
        self.close_frame();
    }
}

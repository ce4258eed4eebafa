use async_trait::async_trait;
use graphql_parser::query::parse_query;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tracing::debug;

use crate::config::{ArgumentSource, EngineConfiguration};
use crate::error::PlanningError;
use crate::federation::FederationMetadata;
use crate::planner::{Planner, RequiredFields};
use crate::schema::OperationKind;
use crate::walker::{Document, Field, SelectionSet, Value, Visitor, WalkContext, Walker, find_operation};
use crate::{FederatedSchema, GraphQLRequest, PlannedFetch, QueryPlan};

#[async_trait]
pub trait QueryPlanner {
    async fn plan_query(
        &self,
        request: &GraphQLRequest,
        schema: &FederatedSchema,
    ) -> Result<QueryPlan, PlanningError>;
}

/// Plans one upstream operation per data source a client operation touches.
pub struct GraphQLQueryPlanner;

impl GraphQLQueryPlanner {
    pub fn new() -> Self {
        GraphQLQueryPlanner
    }

    pub fn plan_operation(
        &self,
        request: &GraphQLRequest,
        schema: &FederatedSchema,
    ) -> Result<QueryPlan, PlanningError> {
        let document: Document = parse_query::<String>(&request.query)
            .map_err(|e| PlanningError::ParseOperation(e.to_string()))?
            .into_static();
        let operation_name = request.operation_name.as_deref();
        let operation_kind = find_operation(&document, operation_name)?.kind;
        let config = schema.config.as_ref();

        let walker = Walker::new(&schema.definition, &document);
        let mut router = Router::new(config, &schema.root_field_map);
        walker.walk(operation_name, &mut router)?;
        let Router { slots, owners, .. } = router;

        let mut plan = QueryPlan {
            operation_kind,
            fetches: Vec::new(),
            subscription: None,
        };

        for (id, slot) in slots.into_iter().enumerate() {
            let data_source = &config.data_sources[slot.data_source];
            let nested = !slot.parent_path.is_empty();
            debug!(data_source = %data_source.name, path = ?slot.parent_path, "planning upstream operation");

            let mut planner = Planner::new(config, data_source, nested, slot.required_fields);
            let mut scope = DataSourceScope::new(&mut planner, id, &slot.parent_path, &owners);
            walker.walk(operation_name, &mut scope)?;

            if operation_kind == OperationKind::Subscription && !nested {
                if plan.subscription.is_some() {
                    return Err(PlanningError::Internal(
                        "subscription root fields resolve from more than one data source".to_string(),
                    ));
                }
                plan.subscription = Some(planner.configure_subscription()?);
            } else {
                plan.fetches.push(PlannedFetch {
                    path: slot.parent_path,
                    config: planner.configure_fetch()?,
                });
            }
        }

        Ok(plan)
    }
}

impl Default for GraphQLQueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryPlanner for GraphQLQueryPlanner {
    async fn plan_query(
        &self,
        request: &GraphQLRequest,
        schema: &FederatedSchema,
    ) -> Result<QueryPlan, PlanningError> {
        self.plan_operation(request, schema)
    }
}

struct PlannerSlot {
    data_source: usize,
    parent_path: Vec<String>,
    required_fields: Vec<RequiredFields>,
}

/// Response path of a field plus the type it is selected on.
type FieldKey = (Vec<String>, String);

/// Assigns every field of the operation to the planner of the data source resolving it.
struct Router<'c> {
    config: &'c EngineConfiguration,
    root_field_map: &'c HashMap<String, Vec<String>>,
    slots: Vec<PlannerSlot>,
    owners: HashMap<FieldKey, usize>,
    owner_stack: Vec<Option<usize>>,
    federation: HashMap<usize, FederationMetadata>,
}

impl<'c> Router<'c> {
    fn new(config: &'c EngineConfiguration, root_field_map: &'c HashMap<String, Vec<String>>) -> Self {
        Router {
            config,
            root_field_map,
            slots: Vec::new(),
            owners: HashMap::new(),
            owner_stack: Vec::new(),
            federation: HashMap::new(),
        }
    }

    fn slot_for(&mut self, data_source: usize, parent_path: Vec<String>) -> usize {
        if let Some(id) = self
            .slots
            .iter()
            .position(|s| s.data_source == data_source && s.parent_path == parent_path)
        {
            return id;
        }
        self.slots.push(PlannerSlot {
            data_source,
            parent_path,
            required_fields: Vec::new(),
        });
        self.slots.len() - 1
    }

    // The first data source registered for a root field resolves it.
    fn root_data_source(&self, type_name: &str, field_name: &str) -> Option<usize> {
        let name = self
            .root_field_map
            .get(&format!("{type_name}.{field_name}"))?
            .first()?;
        self.config.data_sources.iter().position(|ds| &ds.name == name)
    }

    fn route(&mut self, ctx: &WalkContext<'_>, field: &Field) -> Result<Option<usize>, PlanningError> {
        let enclosing = ctx.enclosing_type_name();
        let parent = self.owner_stack.iter().rev().flatten().next().copied();

        let Some(parent) = parent else {
            if field.name == "__typename" {
                return Ok(None);
            }
            let data_source = self.root_data_source(enclosing, &field.name).ok_or_else(|| {
                PlanningError::NoDataSource {
                    type_name: enclosing.to_string(),
                    field_name: field.name.clone(),
                }
            })?;
            return Ok(Some(self.slot_for(data_source, Vec::new())));
        };

        let parent_source = &self.config.data_sources[self.slots[parent].data_source];
        if field.name == "__typename"
            || parent_source.has_root_node(enclosing, &field.name)
            || parent_source.has_child_node(enclosing, &field.name)
        {
            return Ok(Some(parent));
        }
        // fields no data source claims stay with the parent
        let Some(data_source) = self.root_data_source(enclosing, &field.name) else {
            return Ok(Some(parent));
        };

        let slot = self.slot_for(data_source, ctx.path().to_vec());
        self.require_fields(parent, data_source, ctx, field)?;
        Ok(Some(slot))
    }

    // The parent fetch must select what the nested fetch reads from the parent object.
    fn require_fields(
        &mut self,
        parent: usize,
        data_source: usize,
        ctx: &WalkContext<'_>,
        field: &Field,
    ) -> Result<(), PlanningError> {
        let enclosing = ctx.enclosing_type_name();
        let source = &self.config.data_sources[data_source];
        let mut fields = Vec::new();

        if source.federation.enabled {
            let metadata = match self.federation.entry(data_source) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    entry.insert(FederationMetadata::parse(&source.federation.service_sdl)?)
                }
            };
            fields.extend(metadata.required_fields(enclosing, &field.name));
        }
        if let Some(config) = self.config.field_configuration(enclosing, &field.name) {
            for argument in &config.arguments {
                if argument.source_type != ArgumentSource::ObjectField {
                    continue;
                }
                if let Some(first) = argument.source_path.first() {
                    if !fields.contains(first) {
                        fields.push(first.clone());
                    }
                }
            }
        }
        if fields.is_empty() {
            return Ok(());
        }

        let path = ctx.path().to_vec();
        let required = &mut self.slots[parent].required_fields;
        match required
            .iter_mut()
            .find(|r| r.path == path && r.type_name == enclosing)
        {
            Some(existing) => {
                for field in fields {
                    if !existing.fields.contains(&field) {
                        existing.fields.push(field);
                    }
                }
            }
            None => required.push(RequiredFields {
                path,
                type_name: enclosing.to_string(),
                fields,
            }),
        }
        Ok(())
    }
}

impl Visitor for Router<'_> {
    fn enter_field(&mut self, ctx: &mut WalkContext<'_>, field: &Field) {
        let owner = match self.route(ctx, field) {
            Ok(owner) => owner,
            Err(err) => {
                ctx.stop_with_internal_err(err);
                None
            }
        };
        if let Some(owner) = owner {
            let key = (ctx.field_path(field), ctx.enclosing_type_name().to_string());
            self.owners.insert(key, owner);
        }
        self.owner_stack.push(owner);
    }

    fn leave_field(&mut self, _ctx: &mut WalkContext<'_>, _field: &Field) {
        self.owner_stack.pop();
    }
}

/// Forwards walker callbacks to one planner, limited to the part of the operation its
/// data source resolves. Fields owned by other planners are skipped with their subtrees.
struct DataSourceScope<'p, 'a> {
    planner: &'p mut Planner<'a>,
    id: usize,
    entry_path: &'p [String],
    owners: &'p HashMap<FieldKey, usize>,
    entered: bool,
    depth: usize,
    skip: usize,
}

impl<'p, 'a> DataSourceScope<'p, 'a> {
    fn new(
        planner: &'p mut Planner<'a>,
        id: usize,
        entry_path: &'p [String],
        owners: &'p HashMap<FieldKey, usize>,
    ) -> Self {
        DataSourceScope {
            planner,
            id,
            entry_path,
            owners,
            entered: false,
            depth: 0,
            skip: 0,
        }
    }

    fn active(&self) -> bool {
        self.depth > 0 && self.skip == 0
    }
}

impl Visitor for DataSourceScope<'_, '_> {
    fn enter_document(&mut self, ctx: &mut WalkContext<'_>) {
        self.planner.enter_document(ctx);
    }

    fn leave_document(&mut self, ctx: &mut WalkContext<'_>) {
        self.planner.leave_document(ctx);
    }

    fn enter_operation_definition(&mut self, ctx: &mut WalkContext<'_>) {
        self.planner.enter_operation_definition(ctx);
    }

    fn leave_operation_definition(&mut self, ctx: &mut WalkContext<'_>) {
        self.planner.leave_operation_definition(ctx);
    }

    fn enter_selection_set(&mut self, ctx: &mut WalkContext<'_>, set: &SelectionSet) {
        if self.skip > 0 {
            return;
        }
        if self.depth == 0 {
            if self.entered || ctx.path() != self.entry_path {
                return;
            }
            self.entered = true;
        }
        self.depth += 1;
        self.planner.enter_selection_set(ctx, set);
    }

    fn leave_selection_set(&mut self, ctx: &mut WalkContext<'_>, set: &SelectionSet) {
        if !self.active() {
            return;
        }
        self.planner.leave_selection_set(ctx, set);
        self.depth -= 1;
    }

    fn enter_field(&mut self, ctx: &mut WalkContext<'_>, field: &Field) {
        if self.skip > 0 {
            self.skip += 1;
            return;
        }
        if self.depth == 0 {
            return;
        }
        let key = (ctx.field_path(field), ctx.enclosing_type_name().to_string());
        if self.owners.get(&key) != Some(&self.id) {
            self.skip = 1;
            return;
        }
        self.planner.enter_field(ctx, field);
    }

    fn leave_field(&mut self, ctx: &mut WalkContext<'_>, field: &Field) {
        if self.skip > 0 {
            self.skip -= 1;
            return;
        }
        if self.depth == 0 {
            return;
        }
        self.planner.leave_field(ctx, field);
    }

    fn enter_argument(&mut self, ctx: &mut WalkContext<'_>, field: &Field, name: &str, value: &Value) {
        if self.active() {
            self.planner.enter_argument(ctx, field, name, value);
        }
    }

    fn enter_inline_fragment(&mut self, ctx: &mut WalkContext<'_>, type_condition: Option<&str>) {
        if self.active() {
            self.planner.enter_inline_fragment(ctx, type_condition);
        }
    }

    fn leave_inline_fragment(&mut self, ctx: &mut WalkContext<'_>, type_condition: Option<&str>) {
        if self.active() {
            self.planner.leave_inline_fragment(ctx, type_condition);
        }
    }
}

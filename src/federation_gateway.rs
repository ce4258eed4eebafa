use bytes::Bytes;
use futures::future::try_join_all;
use http::HeaderMap;
use serde_json::Value;
use std::{path::Path, sync::Arc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    GraphQLRequest, QueryPlan,
    batch::{BatchFactory, GraphQLBatchFactory},
    config::{DataSourceConfiguration, EngineConfiguration},
    error::{ConfigError, FetchError, PlanningError, SubscriptionError},
    fetch::{DataSource, FetchResponse, HttpSource, SingleFlight},
    planner::{FetchConfiguration, SubscriptionConfiguration},
    query_planner::{GraphQLQueryPlanner, QueryPlanner},
    schema_registry::{InMemorySchemaRegistry, SchemaRegistry},
    subscription::{GraphQLSubscriptionSource, SubscriptionClient, SubscriptionManager, Trigger},
    variables::RenderContext,
};

pub struct FederationGateway {
    schema_registry: Arc<RwLock<Box<dyn SchemaRegistry + Send + Sync>>>,
    query_planner: Arc<Box<dyn QueryPlanner + Send + Sync>>,
    data_source: Arc<dyn DataSource>,
    batch_factory: Arc<dyn BatchFactory>,
    subscriptions: SubscriptionManager,
    single_flight: SingleFlight,
}

impl FederationGateway {
    pub fn new(
        schema_registry: Box<dyn SchemaRegistry + Send + Sync>,
        query_planner: Box<dyn QueryPlanner + Send + Sync>,
        data_source: Arc<dyn DataSource>,
        batch_factory: Arc<dyn BatchFactory>,
        subscriptions: SubscriptionManager,
    ) -> Self {
        FederationGateway {
            schema_registry: Arc::new(RwLock::new(schema_registry)),
            query_planner: Arc::new(query_planner),
            data_source,
            batch_factory,
            subscriptions,
            single_flight: SingleFlight::new(),
        }
    }

    /// Default wiring: in-memory registry, HTTP fetches and upstream subscriptions sharing
    /// one HTTP client. Upstream websockets close when `cancel` fires.
    pub fn from_config(config: EngineConfiguration, cancel: CancellationToken) -> Self {
        let http_client = reqwest::Client::new();
        let subscription_client =
            SubscriptionClient::new(http_client.clone(), cancel, &config.subscription_client);

        FederationGateway::new(
            Box::new(InMemorySchemaRegistry::new(config)),
            Box::new(GraphQLQueryPlanner::new()),
            Arc::new(HttpSource::with_client(http_client)),
            Arc::new(GraphQLBatchFactory::new()),
            SubscriptionManager::new(Arc::new(GraphQLSubscriptionSource::new(
                subscription_client,
            ))),
        )
    }

    pub fn from_config_file(path: impl AsRef<Path>, cancel: CancellationToken) -> Result<Self, ConfigError> {
        let config = EngineConfiguration::from_file(path)?;
        Ok(Self::from_config(config, cancel))
    }

    pub async fn register_data_source(&self, data_source: DataSourceConfiguration) -> Result<(), PlanningError> {
        let mut schema_registry = self.schema_registry.write().await;
        schema_registry.register_data_source(data_source).await
    }

    pub async fn plan_request(&self, request: &GraphQLRequest) -> Result<QueryPlan, PlanningError> {
        let schema_registry = self.schema_registry.read().await;
        let schema = schema_registry.get_schema().await?;
        drop(schema_registry);

        let plan = self.query_planner.plan_query(request, &schema).await?;
        debug!(
            kind = ?plan.operation_kind,
            fetches = plan.fetches.len(),
            subscription = plan.subscription.is_some(),
            "planned request"
        );
        Ok(plan)
    }

    /// Runs a root fetch with the client's variables and headers. Identical concurrent
    /// fetches share one upstream call unless the fetch disallows it (mutations).
    pub async fn load(
        &self,
        fetch: &FetchConfiguration,
        variables: &Value,
        headers: &HeaderMap,
    ) -> Result<FetchResponse, FetchError> {
        let input = Bytes::from(fetch.input.render(&RenderContext::new(variables, headers))?);
        if fetch.disallow_single_flight {
            return self.data_source.load(&input).await;
        }
        self.single_flight.load(&self.data_source, input).await
    }

    /// Runs a nested fetch once per parent object and returns one response per parent,
    /// merging the calls into a single batch when the fetch allows it.
    pub async fn load_entities(
        &self,
        fetch: &FetchConfiguration,
        variables: &Value,
        headers: &HeaderMap,
        parents: &[Value],
    ) -> Result<Vec<FetchResponse>, FetchError> {
        let ctx = RenderContext::new(variables, headers);
        let inputs = parents
            .iter()
            .map(|parent| fetch.input.render(&ctx.with_object(parent)).map(Bytes::from))
            .collect::<Result<Vec<Bytes>, FetchError>>()?;

        let allow_batch = fetch.batch.as_ref().is_some_and(|b| b.allow_batch);
        if !allow_batch || inputs.len() < 2 {
            return try_join_all(inputs.iter().map(|input| self.data_source.load(input))).await;
        }

        let batch = self.batch_factory.create_batch(&inputs)?;
        debug!(
            data_source = %fetch.data_source,
            inputs = batch.batch_size,
            calls = batch.response_mappings.len(),
            "loading entity batch"
        );
        let response = self.data_source.load(&batch.resulted_input).await?;
        Ok(batch.demultiplex(&response)?)
    }

    /// Starts (or joins) the upstream stream of a planned subscription.
    pub async fn subscribe(
        &self,
        subscription: &SubscriptionConfiguration,
        variables: &Value,
        headers: &HeaderMap,
    ) -> Result<Trigger, SubscriptionError> {
        let input = subscription
            .input
            .render(&RenderContext::new(variables, headers))
            .map_err(|e| SubscriptionError::Render(e.to_string()))?;
        self.subscriptions.start_trigger(Bytes::from(input)).await
    }

    pub async fn unsubscribe(&self, trigger: &Trigger) {
        self.subscriptions.stop_trigger(trigger).await;
    }
}

pub mod batch;
pub mod config;
pub mod error;
pub mod federation;
pub mod federation_gateway;
pub mod fetch;
pub mod normalizer;
pub mod planner;
pub mod printer;
pub mod query_planner;
pub mod schema;
pub mod schema_registry;
pub mod subscription;
pub mod upstream;
pub mod variables;
pub mod walker;

pub use batch::{Batch, BatchFactory, GraphQLBatchFactory};
pub use config::EngineConfiguration;
pub use federation_gateway::FederationGateway;
pub use fetch::{DataSource, FetchResponse, HttpSource};
pub use query_planner::{GraphQLQueryPlanner, QueryPlanner};
pub use schema_registry::{InMemorySchemaRegistry, SchemaRegistry};
pub use subscription::{SubscriptionManager, SubscriptionProtocol};

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use planner::{FetchConfiguration, SubscriptionConfiguration};
use schema::{OperationKind, SchemaIndex};

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct GraphQLRequest {
    pub query: String,
    pub variables: Option<Value>,
    #[serde(rename = "operationName")]
    pub operation_name: Option<String>,
    #[serde(skip)]
    pub headers: HeaderMap,
}

/// Composed schema plus the data sources it is served from.
#[derive(Clone)]
pub struct FederatedSchema {
    pub definition: Arc<SchemaIndex>,
    pub config: Arc<EngineConfiguration>,
    /// `Type.field` to the names of data sources resolving it as a root node.
    pub root_field_map: HashMap<String, Vec<String>>,
}

/// Upstream fetch planned for the objects found at `path` in the response.
#[derive(Clone, Debug)]
pub struct PlannedFetch {
    pub path: Vec<String>,
    pub config: FetchConfiguration,
}

#[derive(Clone, Debug)]
pub struct QueryPlan {
    pub operation_kind: OperationKind,
    pub fetches: Vec<PlannedFetch>,
    pub subscription: Option<SubscriptionConfiguration>,
}

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::{DataSourceConfiguration, EngineConfiguration};
use crate::error::PlanningError;
use crate::schema::SchemaIndex;
use crate::FederatedSchema;

#[async_trait]
pub trait SchemaRegistry {
    async fn register_data_source(&mut self, data_source: DataSourceConfiguration) -> Result<(), PlanningError>;
    async fn get_schema(&self) -> Result<FederatedSchema, PlanningError>;
}

pub struct InMemorySchemaRegistry {
    config: Arc<RwLock<EngineConfiguration>>,
    federated_schema: Arc<RwLock<Option<FederatedSchema>>>,
}

impl InMemorySchemaRegistry {
    pub fn new(config: EngineConfiguration) -> Self {
        InMemorySchemaRegistry {
            config: Arc::new(RwLock::new(config)),
            federated_schema: Arc::new(RwLock::new(None)),
        }
    }

    fn build_federated_schema(&self, config: &EngineConfiguration) -> Result<FederatedSchema, PlanningError> {
        let definition = SchemaIndex::parse(&config.schema)?;
        let mut root_field_map: HashMap<String, Vec<String>> = HashMap::new();

        for data_source in &config.data_sources {
            for node in &data_source.root_nodes {
                for field_name in &node.field_names {
                    let field_key = format!("{}.{}", node.type_name, field_name);
                    if definition.field(&node.type_name, field_name).is_none() {
                        debug!(data_source = %data_source.name, field = %field_key, "root node is not part of the composed schema");
                    }
                    root_field_map
                        .entry(field_key)
                        .or_default()
                        .push(data_source.name.clone());
                }
            }
        }

        debug!(?root_field_map, "built root field map");
        Ok(FederatedSchema {
            definition: Arc::new(definition),
            config: Arc::new(config.clone()),
            root_field_map,
        })
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    /// Adds a data source, replacing one registered under the same name.
    async fn register_data_source(&mut self, data_source: DataSourceConfiguration) -> Result<(), PlanningError> {
        let mut config = self.config.write().await;
        config.data_sources.retain(|ds| ds.name != data_source.name);
        config.data_sources.push(data_source);

        let mut federated_schema = self.federated_schema.write().await;
        *federated_schema = None;

        Ok(())
    }

    async fn get_schema(&self) -> Result<FederatedSchema, PlanningError> {
        let cached_schema = self.federated_schema.read().await;
        if let Some(schema) = &*cached_schema {
            return Ok(schema.clone());
        }
        drop(cached_schema);

        let config = self.config.read().await;
        let schema = self.build_federated_schema(&config)?;

        let mut federated_schema = self.federated_schema.write().await;
        *federated_schema = Some(schema.clone());

        Ok(schema)
    }
}

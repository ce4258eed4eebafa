use serde::Deserialize;
use std::collections::BTreeMap;
use std::{fs, path::Path};
use tracing::debug;

use crate::error::ConfigError;
use crate::subscription::SubscriptionProtocol;

/// Engine configuration: the composed schema plus every upstream data source.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EngineConfiguration {
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub schema_file: Option<String>,
    #[serde(default)]
    pub data_sources: Vec<DataSourceConfiguration>,
    #[serde(default)]
    pub fields: Vec<FieldConfiguration>,
    #[serde(default)]
    pub types: Vec<TypeConfiguration>,
    #[serde(default)]
    pub subscription_client: SubscriptionClientOptions,
}

impl EngineConfiguration {
    /// Loads a YAML configuration. Schema files are resolved against the config's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_dir = path.parent().unwrap_or_else(|| Path::new(""));
        debug!(?path, "loading engine configuration");

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: EngineConfiguration = serde_yaml::from_str(&contents)?;
        config.resolve_files(config_dir)?;
        Ok(config)
    }

    fn resolve_files(&mut self, base_dir: &Path) -> Result<(), ConfigError> {
        if let Some(file) = self.schema_file.take() {
            self.schema = read_schema_file(base_dir, &file)?;
        }
        for data_source in &mut self.data_sources {
            if let Some(file) = data_source.federation.service_sdl_file.take() {
                data_source.federation.service_sdl = read_schema_file(base_dir, &file)?;
            }
            if let Some(file) = data_source.upstream_schema_file.take() {
                data_source.upstream_schema = Some(read_schema_file(base_dir, &file)?);
            }
        }
        Ok(())
    }

    pub fn field_configuration(&self, type_name: &str, field_name: &str) -> Option<&FieldConfiguration> {
        self.fields
            .iter()
            .find(|f| f.type_name == type_name && f.field_name == field_name)
    }

    pub fn rename_type<'a>(&'a self, type_name: &'a str) -> &'a str {
        self.types
            .iter()
            .find(|t| t.type_name == type_name)
            .map(|t| t.rename_to.as_str())
            .unwrap_or(type_name)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct TypeField {
    pub type_name: String,
    pub field_names: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DataSourceConfiguration {
    pub name: String,
    #[serde(default)]
    pub root_nodes: Vec<TypeField>,
    #[serde(default)]
    pub child_nodes: Vec<TypeField>,
    pub fetch: FetchConfig,
    #[serde(default)]
    pub subscription: Option<SubscriptionConfig>,
    #[serde(default)]
    pub federation: FederationConfiguration,
    #[serde(default)]
    pub upstream_schema: Option<String>,
    #[serde(default)]
    pub upstream_schema_file: Option<String>,
}

impl DataSourceConfiguration {
    pub fn has_root_node(&self, type_name: &str, field_name: &str) -> bool {
        has_node(&self.root_nodes, type_name, field_name)
    }

    pub fn has_child_node(&self, type_name: &str, field_name: &str) -> bool {
        has_node(&self.child_nodes, type_name, field_name)
    }
}

fn has_node(nodes: &[TypeField], type_name: &str, field_name: &str) -> bool {
    nodes
        .iter()
        .any(|n| n.type_name == type_name && n.field_names.iter().any(|f| f == field_name))
}

#[derive(Clone, Debug, Deserialize)]
pub struct FetchConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub header: BTreeMap<String, Vec<String>>,
}

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubscriptionConfig {
    /// Falls back to the fetch url when empty.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub protocol: Option<SubscriptionProtocol>,
    #[serde(default)]
    pub sse_method_post: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FederationConfiguration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub service_sdl: String,
    #[serde(default)]
    pub service_sdl_file: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentSource {
    #[default]
    FieldArgument,
    ObjectField,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ArgumentConfiguration {
    pub name: String,
    #[serde(default)]
    pub source_type: ArgumentSource,
    #[serde(default)]
    pub source_path: Vec<String>,
    #[serde(default)]
    pub rename_type_to: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FieldConfiguration {
    pub type_name: String,
    pub field_name: String,
    /// Upstream path of the field. A single element differing from `field_name` renames it upstream.
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<ArgumentConfiguration>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TypeConfiguration {
    pub type_name: String,
    pub rename_to: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SubscriptionClientOptions {
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub ws_sub_protocol: Option<SubscriptionProtocol>,
}

impl Default for SubscriptionClientOptions {
    fn default() -> Self {
        SubscriptionClientOptions {
            read_timeout_ms: default_read_timeout_ms(),
            ws_sub_protocol: None,
        }
    }
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn read_schema_file(base_dir: &Path, file_path: &str) -> Result<String, ConfigError> {
    let full_path = base_dir.join(file_path);
    debug!(path = ?full_path, "reading schema file");
    fs::read_to_string(&full_path).map_err(|source| ConfigError::Io {
        path: full_path.display().to_string(),
        source,
    })
}

use http::StatusCode;
use std::sync::Arc;

/// Errors that abort planning of the current operation.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("failed to parse operation: {0}")]
    ParseOperation(String),
    #[error("failed to parse schema: {0}")]
    ParseSchema(String),
    #[error("failed parsing federation SDL: {0}")]
    FederationSdl(String),
    #[error("operation {0:?} not found in document")]
    UnknownOperation(Option<String>),
    #[error("no data source found for field {type_name}.{field_name}")]
    NoDataSource {
        type_name: String,
        field_name: String,
    },
    #[error("normalization failed: {0}")]
    Normalization(String),
    #[error("internal planner error: {0}")]
    Internal(String),
}

/// Errors raised while merging fetch inputs into a batch or splitting its response.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("batch input {index} is malformed: {source}")]
    MalformedInput {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("batch needs at least one input")]
    EmptyBatch,
    #[error("batch response is malformed: {0}")]
    MalformedResponse(#[source] serde_json::Error),
    #[error("expected {expected} outputs, got {actual}")]
    OutputCountMismatch { expected: usize, actual: usize },
}

/// Errors from the transport layer of a single upstream call.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to upstream failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream responded with unexpected status code {0}")]
    UnexpectedStatus(StatusCode),
    #[error("fetch input is invalid: {0}")]
    InvalidInput(#[source] serde_json::Error),
    #[error("fetch input has an invalid {0}")]
    InvalidRequestPart(&'static str),
    #[error("upstream response is not valid JSON: {0}")]
    InvalidResponse(#[source] serde_json::Error),
    #[error("failed to render variable: {0}")]
    Render(String),
    #[error(transparent)]
    Batch(#[from] BatchError),
    /// Failure of an upstream call shared by several identical fetches.
    #[error(transparent)]
    Shared(Arc<FetchError>),
}

/// Errors raised while opening an upstream subscription.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid subscription input: {0}")]
    InvalidInput(#[source] serde_json::Error),
    #[error("subscription input has no query")]
    MissingQuery,
    #[error("invalid header in subscription request: {0}")]
    InvalidHeader(String),
    #[error("timeout while waiting for connection_ack")]
    AckTimeout,
    #[error("expected connection_ack or ka, got {0}")]
    UnexpectedAck(String),
    #[error("connection closed before connection_ack")]
    ClosedBeforeAck,
    #[error("unknown protocol {0}")]
    UnknownProtocol(String),
    #[error("failed to connect to stream unexpected resp status code: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("stream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("connection init callback failed: {0}")]
    InitCallback(String),
    #[error("failed to render subscription input: {0}")]
    Render(String),
}

/// Errors raised while loading engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

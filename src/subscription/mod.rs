//! Upstream GraphQL subscriptions over `graphql-ws`, `graphql-transport-ws` and SSE.
//!
//! One connection handler owns each upstream socket and multiplexes subscriptions onto it.
//! [`SubscriptionManager`] sits above the handlers and shares one upstream stream between
//! every trigger started with the same input.

mod client;
mod graphql_transport_ws;
mod graphql_ws;
mod manager;
mod sse;
mod ws;

pub use client::{OnWsConnectionInit, SubscriptionClient};
pub use manager::{SubscriptionManager, Trigger};
pub use sse::SseConnectionHandler;
pub use ws::WsConnectionHandler;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SubscriptionError;

pub(crate) const INTERNAL_ERROR: &str = r#"{"errors":[{"message":"internal error"}]}"#;
pub(crate) const CONNECTION_ERROR: &str = r#"{"errors":[{"message":"connection error"}]}"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionProtocol {
    #[serde(rename = "graphql-ws")]
    GraphQLWs,
    #[serde(rename = "graphql-transport-ws")]
    GraphQLTransportWs,
    #[serde(rename = "sse")]
    Sse,
}

impl SubscriptionProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionProtocol::GraphQLWs => "graphql-ws",
            SubscriptionProtocol::GraphQLTransportWs => "graphql-transport-ws",
            SubscriptionProtocol::Sse => "sse",
        }
    }

    /// Websocket sub-protocol named in a `Sec-WebSocket-Protocol` header.
    pub fn from_ws_sub_protocol(value: &str) -> Option<Self> {
        match value.trim() {
            "graphql-ws" => Some(SubscriptionProtocol::GraphQLWs),
            "graphql-transport-ws" => Some(SubscriptionProtocol::GraphQLTransportWs),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body sent upstream for one subscription.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphQLBody {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,
    #[serde(rename = "operationName", default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Box<RawValue>>,
}

/// Rendered subscription input.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GraphQLSubscriptionOptions {
    pub url: String,
    #[serde(default)]
    pub body: GraphQLBody,
    #[serde(default)]
    pub header: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub use_sse: bool,
    #[serde(default)]
    pub sse_method_post: bool,
}

/// A subscription bound to one upstream connection. Dropping `next` signals completion
/// to the consumer.
pub struct Subscription {
    pub cancel: CancellationToken,
    pub options: GraphQLSubscriptionOptions,
    pub next: mpsc::Sender<Bytes>,
}

#[async_trait]
pub trait GraphQLSubscriptionClient: Send + Sync {
    async fn subscribe(
        &self,
        cancel: CancellationToken,
        options: GraphQLSubscriptionOptions,
        next: mpsc::Sender<Bytes>,
    ) -> Result<(), SubscriptionError>;
}

/// Starts upstream streams from raw subscription inputs.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn start(
        &self,
        cancel: CancellationToken,
        input: &[u8],
        next: mpsc::Sender<Bytes>,
    ) -> Result<(), SubscriptionError>;
}

pub struct GraphQLSubscriptionSource<C> {
    client: C,
}

impl<C: GraphQLSubscriptionClient> GraphQLSubscriptionSource<C> {
    pub fn new(client: C) -> Self {
        GraphQLSubscriptionSource { client }
    }
}

#[async_trait]
impl<C: GraphQLSubscriptionClient> SubscriptionSource for GraphQLSubscriptionSource<C> {
    async fn start(
        &self,
        cancel: CancellationToken,
        input: &[u8],
        next: mpsc::Sender<Bytes>,
    ) -> Result<(), SubscriptionError> {
        let options: GraphQLSubscriptionOptions =
            serde_json::from_slice(input).map_err(SubscriptionError::InvalidInput)?;
        if options.body.query.is_empty() {
            return Err(SubscriptionError::MissingQuery);
        }
        self.client.subscribe(cancel, options, next).await
    }
}

/// `{"errors":[{"message":<message>}]}`
pub(crate) fn error_message(message: &str) -> Bytes {
    let payload = serde_json::json!({ "errors": [{ "message": message }] });
    Bytes::from(payload.to_string())
}

/// Wraps an error payload into a response: lists become `errors`, an object its only entry.
pub(crate) fn errors_payload(payload: Option<&RawValue>) -> Bytes {
    let Some(payload) = payload else {
        return Bytes::from_static(INTERNAL_ERROR.as_bytes());
    };
    let raw = payload.get().trim_start();
    if raw.starts_with('[') {
        Bytes::from(format!(r#"{{"errors":{raw}}}"#))
    } else if raw.starts_with('{') {
        Bytes::from(format!(r#"{{"errors":[{raw}]}}"#))
    } else {
        Bytes::from_static(INTERNAL_ERROR.as_bytes())
    }
}

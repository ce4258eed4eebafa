use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::SEC_WEBSOCKET_PROTOCOL;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::graphql_transport_ws::PONG_MESSAGE;
use super::sse::{SseConnectionHandler, header_map};
use super::ws::{WsConnectionHandler, WsStream};
use super::{GraphQLSubscriptionClient, GraphQLSubscriptionOptions, Subscription, SubscriptionProtocol};
use crate::config::SubscriptionClientOptions;
use crate::error::SubscriptionError;

const ACK_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECTION_INIT_MESSAGE: &str = r#"{"type":"connection_init"}"#;

/// Builds the `connection_init` payload for an upstream url and its forwarded headers.
pub type OnWsConnectionInit =
    Arc<dyn Fn(&str, &BTreeMap<String, Vec<String>>) -> Result<Option<Value>, String> + Send + Sync>;

/// Opens upstream subscriptions. Websocket subscriptions with the same url and headers
/// share one connection.
#[derive(Clone)]
pub struct SubscriptionClient {
    http_client: reqwest::Client,
    engine_cancel: CancellationToken,
    handlers: Arc<Mutex<HashMap<u64, mpsc::Sender<Subscription>>>>,
    read_timeout: Duration,
    ack_timeout: Duration,
    ws_sub_protocol: Option<SubscriptionProtocol>,
    on_ws_connection_init: Option<OnWsConnectionInit>,
}

#[derive(Deserialize)]
struct AckMessage {
    #[serde(rename = "type")]
    message_type: String,
}

impl SubscriptionClient {
    /// Connections live until `engine_cancel` fires or their last subscription ends.
    pub fn new(
        http_client: reqwest::Client,
        engine_cancel: CancellationToken,
        options: &SubscriptionClientOptions,
    ) -> Self {
        SubscriptionClient {
            http_client,
            engine_cancel,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            read_timeout: Duration::from_millis(options.read_timeout_ms),
            ack_timeout: ACK_WAIT_TIMEOUT,
            ws_sub_protocol: options.ws_sub_protocol,
            on_ws_connection_init: None,
        }
    }

    pub fn with_on_ws_connection_init(mut self, callback: OnWsConnectionInit) -> Self {
        self.on_ws_connection_init = Some(callback);
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    /// Number of open websocket connections.
    pub async fn active_connections(&self) -> usize {
        self.handlers.lock().await.len()
    }

    fn subscribe_sse(&self, sub: Subscription) {
        debug!(url = %sub.options.url, post = sub.options.sse_method_post, "starting sse subscription");
        let handler = SseConnectionHandler::new(self.http_client.clone());
        tokio::spawn(handler.start_blocking(sub));
    }

    async fn subscribe_ws(&self, sub: Subscription) -> Result<(), SubscriptionError> {
        let handler_id = handler_id(&sub.options);

        let existing = self.handlers.lock().await.get(&handler_id).cloned();
        let sub = match existing {
            Some(subscribe_tx) => match subscribe_tx.send(sub).await {
                Ok(()) => {
                    debug!(handler_id, "reusing upstream connection");
                    return Ok(());
                }
                Err(mpsc::error::SendError(sub)) => {
                    remove_handler(&self.handlers, handler_id, &subscribe_tx).await;
                    sub
                }
            },
            None => sub,
        };

        let (handler, subscribe_tx) = self.new_ws_connection_handler(&sub.options).await?;
        self.handlers
            .lock()
            .await
            .insert(handler_id, subscribe_tx.clone());

        let handlers = Arc::clone(&self.handlers);
        let cancel = self.engine_cancel.clone();
        tokio::spawn(async move {
            handler.start_blocking(cancel, sub).await;
            remove_handler(&handlers, handler_id, &subscribe_tx).await;
        });
        Ok(())
    }

    async fn new_ws_connection_handler(
        &self,
        options: &GraphQLSubscriptionOptions,
    ) -> Result<(WsConnectionHandler, mpsc::Sender<Subscription>), SubscriptionError> {
        let mut request = ws_url(&options.url).into_client_request()?;
        request.headers_mut().extend(header_map(options)?);
        let offered = match self.ws_sub_protocol {
            Some(protocol) => protocol.as_str(),
            None => "graphql-ws, graphql-transport-ws",
        };
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(offered));

        let (mut ws, response) = tokio_tungstenite::connect_async(request).await?;
        let negotiated = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let protocol = SubscriptionProtocol::from_ws_sub_protocol(negotiated)
            .ok_or_else(|| SubscriptionError::UnknownProtocol(negotiated.to_string()))?;

        let init = self.connection_init_message(options)?;
        ws.send(Message::Text(init)).await?;
        tokio::time::timeout(self.ack_timeout, wait_for_ack(&mut ws))
            .await
            .map_err(|_| SubscriptionError::AckTimeout)??;

        info!(url = %options.url, %protocol, "upstream websocket connected");
        Ok(WsConnectionHandler::new(ws, protocol, self.read_timeout))
    }

    fn connection_init_message(&self, options: &GraphQLSubscriptionOptions) -> Result<String, SubscriptionError> {
        let Some(callback) = &self.on_ws_connection_init else {
            return Ok(CONNECTION_INIT_MESSAGE.to_string());
        };
        match callback(&options.url, &options.header).map_err(SubscriptionError::InitCallback)? {
            Some(payload) => Ok(format!(r#"{{"type":"connection_init","payload":{payload}}}"#)),
            None => Ok(CONNECTION_INIT_MESSAGE.to_string()),
        }
    }
}

#[async_trait]
impl GraphQLSubscriptionClient for SubscriptionClient {
    async fn subscribe(
        &self,
        cancel: CancellationToken,
        options: GraphQLSubscriptionOptions,
        next: mpsc::Sender<Bytes>,
    ) -> Result<(), SubscriptionError> {
        let sub = Subscription { cancel, options, next };
        if sub.options.use_sse {
            self.subscribe_sse(sub);
            return Ok(());
        }
        self.subscribe_ws(sub).await
    }
}

async fn wait_for_ack(ws: &mut WsStream) -> Result<(), SubscriptionError> {
    loop {
        let text = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) => {
                return Err(SubscriptionError::UnexpectedAck("binary message".to_string()));
            }
            Some(Ok(Message::Close(_))) | None => return Err(SubscriptionError::ClosedBeforeAck),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
        };
        let message: AckMessage =
            serde_json::from_str(&text).map_err(|_| SubscriptionError::UnexpectedAck(text.clone()))?;
        match message.message_type.as_str() {
            "ka" => continue,
            "ping" => ws.send(Message::Text(PONG_MESSAGE.to_string())).await?,
            "connection_ack" => return Ok(()),
            other => return Err(SubscriptionError::UnexpectedAck(other.to_string())),
        }
    }
}

async fn remove_handler(
    handlers: &Mutex<HashMap<u64, mpsc::Sender<Subscription>>>,
    handler_id: u64,
    subscribe_tx: &mpsc::Sender<Subscription>,
) {
    let mut handlers = handlers.lock().await;
    if handlers
        .get(&handler_id)
        .is_some_and(|tx| tx.same_channel(subscribe_tx))
    {
        handlers.remove(&handler_id);
    }
}

fn handler_id(options: &GraphQLSubscriptionOptions) -> u64 {
    fxhash::hash64(&(&options.url, &options.header))
}

fn ws_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_http_urls() {
        assert_eq!(ws_url("http://localhost:4000/graphql"), "ws://localhost:4000/graphql");
        assert_eq!(ws_url("https://api/graphql"), "wss://api/graphql");
        assert_eq!(ws_url("ws://api/graphql"), "ws://api/graphql");
    }

    #[test]
    fn handler_id_depends_on_url_and_headers() {
        let mut a = GraphQLSubscriptionOptions {
            url: "ws://a".to_string(),
            ..Default::default()
        };
        let b = a.clone();
        assert_eq!(handler_id(&a), handler_id(&b));
        a.header.insert("Authorization".to_string(), vec!["token".to_string()]);
        assert_ne!(handler_id(&a), handler_id(&b));
    }
}

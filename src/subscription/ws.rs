use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{
    Subscription, SubscriptionProtocol, error_message, errors_payload, graphql_transport_ws,
    graphql_ws,
};
use crate::error::SubscriptionError;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Bounds how long one slow consumer holds up the other subscriptions of its connection.
const DELIVERY_TIMEOUT: Duration = Duration::from_millis(100);

/// Server frame of either websocket sub-protocol.
#[derive(Deserialize)]
pub(crate) struct ServerMessage<'a> {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(borrow, default)]
    pub payload: Option<&'a RawValue>,
}

/// Owns one upstream websocket and every subscription multiplexed onto it.
pub struct WsConnectionHandler {
    protocol: SubscriptionProtocol,
    conn: WsConnection,
    stream: SplitStream<WsStream>,
    subscribe_rx: mpsc::Receiver<Subscription>,
    read_timeout: Duration,
}

/// Write half of the socket plus the subscription table.
pub(crate) struct WsConnection {
    protocol: SubscriptionProtocol,
    sink: SplitSink<WsStream, Message>,
    next_subscription_id: u64,
    subscriptions: HashMap<String, Subscription>,
}

impl WsConnectionHandler {
    /// Wraps an acknowledged socket. Further subscriptions for this connection are sent
    /// through the returned channel.
    pub fn new(
        ws: WsStream,
        protocol: SubscriptionProtocol,
        read_timeout: Duration,
    ) -> (Self, mpsc::Sender<Subscription>) {
        let (sink, stream) = ws.split();
        let (subscribe_tx, subscribe_rx) = mpsc::channel(1);
        let handler = WsConnectionHandler {
            protocol,
            conn: WsConnection {
                protocol,
                sink,
                next_subscription_id: 0,
                subscriptions: HashMap::new(),
            },
            stream,
            subscribe_rx,
            read_timeout,
        };
        (handler, subscribe_tx)
    }

    /// Runs the connection until no subscription is left, the socket fails or `cancel` fires.
    pub async fn start_blocking(self, cancel: CancellationToken, sub: Subscription) {
        let WsConnectionHandler {
            protocol,
            mut conn,
            stream,
            mut subscribe_rx,
            read_timeout,
        } = self;

        let read_cancel = cancel.child_token();
        let (data_tx, mut data_rx) = mpsc::channel::<String>(1);
        let (err_tx, mut err_rx) = mpsc::channel::<SubscriptionError>(1);

        conn.subscribe(sub).await;
        tokio::spawn(read_blocking(stream, read_cancel.clone(), data_tx, err_tx));

        loop {
            if cancel.is_cancelled() {
                debug!(%protocol, "connection context cancelled");
                conn.broadcast(error_message("context canceled")).await;
                break;
            }
            if !conn.check_active_subscriptions().await {
                // senders holding a stale handle now fail and dial a new connection
                subscribe_rx.close();
                let mut adopted = false;
                while let Ok(sub) = subscribe_rx.try_recv() {
                    conn.subscribe(sub).await;
                    adopted = true;
                }
                if !adopted {
                    debug!(%protocol, "no active subscriptions left");
                    break;
                }
                continue;
            }

            // frames read before a socket error are handled first
            tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                Some(data) = data_rx.recv() => {
                    let flow = match serde_json::from_str::<ServerMessage<'_>>(&data) {
                        Ok(message) => conn.handle_message(message).await,
                        Err(err) => {
                            warn!(%protocol, error = %err, "ignoring malformed message");
                            ControlFlow::Continue(())
                        }
                    };
                    if flow.is_break() {
                        break;
                    }
                }
                Some(sub) = subscribe_rx.recv() => conn.subscribe(sub).await,
                Some(err) = err_rx.recv() => {
                    error!(%protocol, error = %err, "upstream websocket failed");
                    conn.broadcast(error_message(&err.to_string())).await;
                    break;
                }
                _ = tokio::time::sleep(read_timeout) => continue,
            }
        }

        subscribe_rx.close();
        while let Ok(sub) = subscribe_rx.try_recv() {
            debug!(url = %sub.options.url, "rejecting subscription of a closed connection");
            send_payload(&sub, error_message("connection closed")).await;
        }
        read_cancel.cancel();
        conn.unsubscribe_all_and_close().await;
    }
}

async fn read_blocking(
    mut stream: SplitStream<WsStream>,
    cancel: CancellationToken,
    data_tx: mpsc::Sender<String>,
    err_tx: mpsc::Sender<SubscriptionError>,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = stream.next() => frame,
        };
        let err = match frame {
            Some(Ok(Message::Text(text))) => {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = data_tx.send(text) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
                continue;
            }
            Some(Ok(Message::Close(_))) | None => tungstenite::Error::ConnectionClosed,
            Some(Ok(_)) => continue,
            Some(Err(err)) => err,
        };
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = err_tx.send(SubscriptionError::WebSocket(err)) => {}
        }
        return;
    }
}

impl WsConnection {
    async fn handle_message(&mut self, message: ServerMessage<'_>) -> ControlFlow<()> {
        match self.protocol {
            SubscriptionProtocol::GraphQLWs => graphql_ws::handle_message(self, message).await,
            SubscriptionProtocol::GraphQLTransportWs => {
                graphql_transport_ws::handle_message(self, message).await
            }
            SubscriptionProtocol::Sse => ControlFlow::Break(()),
        }
    }

    pub(crate) async fn write(&mut self, frame: String) -> Result<(), tungstenite::Error> {
        self.sink.send(Message::Text(frame)).await
    }

    async fn subscribe(&mut self, sub: Subscription) {
        let payload = match serde_json::to_string(&sub.options.body) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed to encode subscription body");
                return;
            }
        };

        self.next_subscription_id += 1;
        let id = self.next_subscription_id.to_string();
        let frame = match self.protocol {
            SubscriptionProtocol::GraphQLTransportWs => graphql_transport_ws::subscribe_message(&id, &payload),
            _ => graphql_ws::start_message(&id, &payload),
        };

        if let Err(err) = self.write(frame).await {
            error!(%id, error = %err, "failed to start subscription");
            send_payload(&sub, error_message(&err.to_string())).await;
            return;
        }
        debug!(%id, protocol = %self.protocol, "subscription started");
        self.subscriptions.insert(id, sub);
    }

    /// Drops the subscription, closing its channel, and tells the upstream to stop it.
    async fn unsubscribe(&mut self, id: &str) {
        if self.subscriptions.remove(id).is_none() {
            return;
        }
        let frame = match self.protocol {
            SubscriptionProtocol::GraphQLTransportWs => graphql_transport_ws::complete_message(id),
            _ => graphql_ws::stop_message(id),
        };
        if let Err(err) = self.write(frame).await {
            warn!(%id, error = %err, "failed to stop subscription upstream");
        }
    }

    /// Unsubscribes cancelled subscriptions. Returns whether any remain.
    async fn check_active_subscriptions(&mut self) -> bool {
        let cancelled: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.cancel.is_cancelled())
            .map(|(id, _)| id.clone())
            .collect();
        for id in cancelled {
            self.unsubscribe(&id).await;
        }
        !self.subscriptions.is_empty()
    }

    /// Forwards a payload to one subscription. Unknown ids are ignored.
    pub(crate) async fn deliver(&self, id: Option<&str>, payload: Bytes) {
        let Some(sub) = id.and_then(|id| self.subscriptions.get(id)) else {
            return;
        };
        send_payload(sub, payload).await;
    }

    pub(crate) async fn deliver_error(&self, id: Option<&str>, payload: Option<&RawValue>) {
        self.deliver(id, errors_payload(payload)).await;
    }

    /// Upstream finished the subscription.
    pub(crate) fn complete(&mut self, id: Option<&str>) {
        if let Some(id) = id {
            self.subscriptions.remove(id);
        }
    }

    pub(crate) async fn broadcast(&self, payload: Bytes) {
        for sub in self.subscriptions.values() {
            send_payload(sub, payload.clone()).await;
        }
    }

    async fn unsubscribe_all_and_close(mut self) {
        let ids: Vec<String> = self.subscriptions.keys().cloned().collect();
        for id in ids {
            self.unsubscribe(&id).await;
        }
        if let Err(err) = self.sink.close().await {
            debug!(error = %err, "closing upstream websocket");
        }
    }
}

async fn send_payload(sub: &Subscription, payload: Bytes) {
    tokio::select! {
        _ = sub.cancel.cancelled() => {}
        sent = sub.next.send_timeout(payload, DELIVERY_TIMEOUT) => {
            if let Err(err) = sent {
                debug!(error = %err, "subscription consumer did not take the message");
            }
        }
    }
}

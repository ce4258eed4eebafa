//! Framing of the `graphql-transport-ws` sub-protocol.

use bytes::Bytes;
use std::ops::ControlFlow;
use tracing::{error, warn};

use super::INTERNAL_ERROR;
use super::ws::{ServerMessage, WsConnection};

pub(crate) const PONG_MESSAGE: &str = r#"{"type":"pong"}"#;

pub(crate) fn subscribe_message(id: &str, payload: &str) -> String {
    format!(r#"{{"type":"subscribe","id":"{id}","payload":{payload}}}"#)
}

pub(crate) fn complete_message(id: &str) -> String {
    format!(r#"{{"type":"complete","id":"{id}"}}"#)
}

pub(crate) async fn handle_message(conn: &mut WsConnection, message: ServerMessage<'_>) -> ControlFlow<()> {
    let id = message.id.as_deref();
    match message.message_type.as_str() {
        "ping" => {
            if let Err(err) = conn.write(PONG_MESSAGE.to_string()).await {
                warn!(error = %err, "failed to answer ping");
            }
        }
        "next" => {
            let payload = match message.payload {
                Some(payload) => Bytes::copy_from_slice(payload.get().as_bytes()),
                None => Bytes::from_static(INTERNAL_ERROR.as_bytes()),
            };
            conn.deliver(id, payload).await;
        }
        "complete" => conn.complete(id),
        "error" => {
            conn.deliver_error(id, message.payload).await;
            conn.complete(id);
        }
        "ka" => {}
        "data" | "connection_error" => {
            error!(
                message_type = %message.message_type,
                "invalid subprotocol: graphql-ws message on a graphql-transport-ws connection"
            );
            return ControlFlow::Break(());
        }
        other => warn!(message_type = other, "unknown graphql-transport-ws message"),
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames() {
        assert_eq!(
            subscribe_message("2", r#"{"query":"subscription{a}"}"#),
            r#"{"type":"subscribe","id":"2","payload":{"query":"subscription{a}"}}"#
        );
        assert_eq!(complete_message("2"), r#"{"type":"complete","id":"2"}"#);
    }
}

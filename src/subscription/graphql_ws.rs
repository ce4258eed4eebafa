//! Framing of the legacy `graphql-ws` sub-protocol.

use bytes::Bytes;
use std::ops::ControlFlow;
use tracing::{debug, error};

use super::CONNECTION_ERROR;
use super::ws::{ServerMessage, WsConnection};

pub(crate) fn start_message(id: &str, payload: &str) -> String {
    format!(r#"{{"type":"start","id":"{id}","payload":{payload}}}"#)
}

pub(crate) fn stop_message(id: &str) -> String {
    format!(r#"{{"type":"stop","id":"{id}"}}"#)
}

pub(crate) async fn handle_message(conn: &mut WsConnection, message: ServerMessage<'_>) -> ControlFlow<()> {
    let id = message.id.as_deref();
    match message.message_type.as_str() {
        "data" => {
            if let Some(payload) = message.payload {
                conn.deliver(id, Bytes::copy_from_slice(payload.get().as_bytes()))
                    .await;
            }
        }
        "complete" => conn.complete(id),
        "connection_error" => {
            error!("upstream reported a connection error");
            conn.broadcast(Bytes::from_static(CONNECTION_ERROR.as_bytes()))
                .await;
            return ControlFlow::Break(());
        }
        "error" => {
            conn.deliver_error(id, message.payload).await;
            conn.complete(id);
        }
        other => debug!(message_type = other, "ignoring graphql-ws message"),
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames() {
        assert_eq!(
            start_message("1", r#"{"query":"subscription{a}"}"#),
            r#"{"type":"start","id":"1","payload":{"query":"subscription{a}"}}"#
        );
        assert_eq!(stop_message("7"), r#"{"type":"stop","id":"7"}"#);
    }
}

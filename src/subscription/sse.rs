use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use serde_json::Value;
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{GraphQLSubscriptionOptions, INTERNAL_ERROR, Subscription};
use crate::error::SubscriptionError;

/// Upstream events of a server-sent event stream.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseMessage {
    Data(Bytes),
    Error(Bytes),
    Complete,
}

/// Drives one subscription over `text/event-stream`. Every SSE subscription has its own
/// request.
pub struct SseConnectionHandler {
    client: reqwest::Client,
}

impl SseConnectionHandler {
    pub fn new(client: reqwest::Client) -> Self {
        SseConnectionHandler { client }
    }

    /// Streams events into `sub.next` until the upstream completes, fails, or the
    /// subscription is cancelled. `sub.next` is closed on return.
    pub async fn start_blocking(self, sub: Subscription) {
        let (data_tx, mut data_rx) = mpsc::channel::<Bytes>(1);
        let (err_tx, mut err_rx) = mpsc::channel::<Bytes>(1);
        let reader_cancel = sub.cancel.child_token();

        tokio::spawn(subscribe(
            self.client,
            sub.options.clone(),
            reader_cancel.clone(),
            data_tx,
            err_tx,
        ));

        loop {
            tokio::select! {
                biased;
                _ = sub.cancel.cancelled() => break,
                data = data_rx.recv() => match data {
                    Some(payload) => {
                        tokio::select! {
                            _ = sub.cancel.cancelled() => break,
                            _ = sub.next.send(payload) => {}
                        }
                    }
                    None => {
                        // the reader may have queued an error right before finishing
                        if let Ok(payload) = err_rx.try_recv() {
                            let _ = sub.next.send(payload).await;
                        }
                        break;
                    }
                },
                Some(payload) = err_rx.recv() => {
                    let _ = sub.next.send(payload).await;
                    break;
                }
            }
        }
        reader_cancel.cancel();
        debug!(url = %sub.options.url, "sse subscription finished");
    }
}

async fn subscribe(
    client: reqwest::Client,
    options: GraphQLSubscriptionOptions,
    cancel: CancellationToken,
    data_tx: mpsc::Sender<Bytes>,
    err_tx: mpsc::Sender<Bytes>,
) {
    let response = tokio::select! {
        _ = cancel.cancelled() => return,
        response = send_request(&client, &options) => response,
    };
    let response = match response {
        Ok(response) => response,
        Err(err) => {
            error!(url = %options.url, error = %err, "failed to open event stream");
            let _ = err_tx
                .send(Bytes::from_static(INTERNAL_ERROR.as_bytes()))
                .await;
            return;
        }
    };

    let mut events = response.bytes_stream();
    let mut buffer = BytesMut::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = events.next() => chunk,
        };
        match chunk {
            Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
            Some(Err(err)) => {
                error!(url = %options.url, error = %err, "event stream read failed");
                let _ = err_tx
                    .send(Bytes::from_static(INTERNAL_ERROR.as_bytes()))
                    .await;
                return;
            }
            // a trailing event without its blank line is still delivered
            None => {
                let rest = buffer.split().freeze();
                let _ = dispatch(&rest, &data_tx, &err_tx).await;
                return;
            }
        }

        while let Some(event) = next_event(&mut buffer) {
            if dispatch(&event, &data_tx, &err_tx).await.is_break() {
                return;
            }
        }
    }
}

async fn dispatch(
    event: &[u8],
    data_tx: &mpsc::Sender<Bytes>,
    err_tx: &mpsc::Sender<Bytes>,
) -> ControlFlow<()> {
    for message in parse_event(event) {
        match message {
            SseMessage::Data(payload) => {
                if data_tx.send(payload).await.is_err() {
                    return ControlFlow::Break(());
                }
            }
            SseMessage::Error(payload) => {
                let _ = err_tx.send(payload).await;
                return ControlFlow::Break(());
            }
            SseMessage::Complete => return ControlFlow::Break(()),
        }
    }
    ControlFlow::Continue(())
}

async fn send_request(
    client: &reqwest::Client,
    options: &GraphQLSubscriptionOptions,
) -> Result<reqwest::Response, SubscriptionError> {
    let mut headers = header_map(options)?;
    headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    let request = if options.sse_method_post {
        client
            .post(&options.url)
            .headers(headers)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&options.body)
    } else {
        let body = &options.body;
        let mut query: Vec<(&str, &str)> = vec![("query", body.query.as_str())];
        if let Some(variables) = &body.variables {
            query.push(("variables", variables.get()));
        }
        if let Some(operation_name) = &body.operation_name {
            query.push(("operationName", operation_name.as_str()));
        }
        if let Some(extensions) = &body.extensions {
            query.push(("extensions", extensions.get()));
        }
        client.get(&options.url).headers(headers).query(&query)
    };

    let response = request.send().await?;
    if response.status() != StatusCode::OK {
        return Err(SubscriptionError::UnexpectedStatus(response.status()));
    }
    Ok(response)
}

pub(super) fn header_map(options: &GraphQLSubscriptionOptions) -> Result<HeaderMap, SubscriptionError> {
    let mut headers = HeaderMap::new();
    for (name, values) in &options.header {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| SubscriptionError::InvalidHeader(name.clone()))?;
        for value in values {
            let value = HeaderValue::from_str(value)
                .map_err(|_| SubscriptionError::InvalidHeader(name.to_string()))?;
            headers.append(name.clone(), value);
        }
    }
    Ok(headers)
}

/// Splits the next complete event off `buffer`. Events end with a blank line.
pub(crate) fn next_event(buffer: &mut BytesMut) -> Option<Bytes> {
    let (end, delimiter) = [&b"\r\n\r\n"[..], &b"\n\n"[..], &b"\r\r"[..]]
        .iter()
        .filter_map(|delimiter| {
            buffer
                .windows(delimiter.len())
                .position(|window| window == *delimiter)
                .map(|end| (end, delimiter.len()))
        })
        .min_by_key(|(end, _)| *end)?;
    let event = buffer.split_to(end + delimiter).freeze();
    Some(event.slice(..end))
}

/// Interprets the lines of one event. Parsing stops at `event: complete` or an error.
pub(crate) fn parse_event(event: &[u8]) -> Vec<SseMessage> {
    let mut messages = Vec::new();
    for line in event.split(|&b| b == b'\n' || b == b'\r') {
        let line = line.trim_ascii();
        if line.is_empty() || line.starts_with(b":") {
            continue;
        }
        if let Some(data) = line.strip_prefix(b"data:") {
            let data = data.trim_ascii();
            if !data.is_empty() {
                messages.push(SseMessage::Data(Bytes::copy_from_slice(data)));
            }
            continue;
        }
        if let Some(event_type) = line.strip_prefix(b"event:") {
            match event_type.trim_ascii() {
                b"complete" => {
                    messages.push(SseMessage::Complete);
                    break;
                }
                _ => continue,
            }
        }
        if let Some(errors) = error_line(line) {
            messages.push(SseMessage::Error(errors));
            break;
        }
    }
    messages
}

// lines carrying an `errors` field end the stream, anything else unknown is skipped
fn error_line(line: &[u8]) -> Option<Bytes> {
    let Ok(Value::Object(object)) = serde_json::from_slice::<Value>(line) else {
        return None;
    };
    let errors = match object.get("errors")? {
        errors @ Value::Array(_) => serde_json::json!({ "errors": errors }),
        error @ Value::Object(_) => serde_json::json!({ "errors": [error] }),
        _ => return None,
    };
    Some(Bytes::from(errors.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn data(s: &str) -> SseMessage {
        SseMessage::Data(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn parses_data_and_ignores_comments() {
        let event = b": keep-alive\nevent: next\ndata: {\"data\":{\"counter\":1}}\n";
        assert_eq!(parse_event(event), vec![data(r#"{"data":{"counter":1}}"#)]);
    }

    #[test]
    fn stops_on_complete() {
        let event = b"event: complete\ndata: {\"data\":{\"counter\":2}}";
        assert_eq!(parse_event(event), vec![SseMessage::Complete]);
    }

    #[test]
    fn wraps_error_lines() {
        assert_eq!(
            parse_event(br#"{"errors":[{"message":"denied"}]}"#),
            vec![SseMessage::Error(Bytes::from_static(br#"{"errors":[{"message":"denied"}]}"#))]
        );
        assert_eq!(
            parse_event(br#"{"errors":{"message":"denied"}}"#),
            vec![SseMessage::Error(Bytes::from_static(br#"{"errors":[{"message":"denied"}]}"#))]
        );
    }

    #[test]
    fn skips_unknown_lines() {
        assert_eq!(parse_event(b"retry: 100\nnot json\n{\"foo\":1}"), vec![]);
    }

    #[test]
    fn splits_events_on_blank_lines() {
        let mut buffer = BytesMut::from(&b"data: a\n\ndata: b\r\n\r\ndata: c"[..]);
        assert_eq!(next_event(&mut buffer).as_deref(), Some(&b"data: a"[..]));
        assert_eq!(next_event(&mut buffer).as_deref(), Some(&b"data: b"[..]));
        assert_eq!(next_event(&mut buffer), None);
        assert_eq!(&buffer[..], b"data: c");
    }
}

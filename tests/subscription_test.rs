use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::HeaderMap;
use http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use portkey_engine::config::{EngineConfiguration, SubscriptionClientOptions};
use portkey_engine::error::SubscriptionError;
use portkey_engine::subscription::{
    GraphQLBody, GraphQLSubscriptionClient, GraphQLSubscriptionOptions, Subscription,
    SubscriptionClient, WsConnectionHandler,
};
use portkey_engine::{FederationGateway, GraphQLRequest, SubscriptionProtocol};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_hdr_async};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

type ServerSocket = WebSocketStream<TcpStream>;
type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Accepts one websocket connection negotiating `protocol` and runs `script` on it.
async fn ws_server<F, Fut>(protocol: &'static str, script: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, mut response: Response| {
            let offered = request
                .headers()
                .get(SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            assert!(offered.contains(protocol), "protocol {protocol} not offered: {offered}");
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocol));
            Ok::<_, ErrorResponse>(response)
        };
        let ws = accept_hdr_async(stream, callback).await.unwrap();
        script(ws).await;
    });
    (format!("http://{addr}/graphql"), handle)
}

async fn recv_json(ws: &mut ServerSocket) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn send_json(ws: &mut ServerSocket, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn wait_for_close(ws: &mut ServerSocket) {
    while let Some(Ok(frame)) = ws.next().await {
        if frame.is_close() {
            break;
        }
    }
}

fn client() -> SubscriptionClient {
    SubscriptionClient::new(
        reqwest::Client::new(),
        CancellationToken::new(),
        &SubscriptionClientOptions {
            read_timeout_ms: 50,
            ws_sub_protocol: None,
        },
    )
}

fn options(url: &str) -> GraphQLSubscriptionOptions {
    GraphQLSubscriptionOptions {
        url: url.to_string(),
        body: GraphQLBody {
            query: "subscription {counter}".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn bytes(value: Value) -> Option<Bytes> {
    Some(Bytes::from(value.to_string()))
}

#[tokio::test]
async fn graphql_ws_multiplexes_subscriptions_on_one_connection() {
    let (url, server) = ws_server("graphql-ws", |mut ws| async move {
        assert_eq!(recv_json(&mut ws).await, json!({"type": "connection_init"}));
        send_json(&mut ws, json!({"type": "connection_ack"})).await;
        send_json(&mut ws, json!({"type": "ka"})).await;

        for id in ["1", "2"] {
            assert_eq!(
                recv_json(&mut ws).await,
                json!({"type": "start", "id": id, "payload": {"query": "subscription {counter}"}})
            );
        }
        send_json(&mut ws, json!({"type": "data", "id": "1", "payload": {"data": {"counter": 1}}})).await;
        send_json(&mut ws, json!({"type": "data", "id": "2", "payload": {"data": {"counter": 2}}})).await;
        send_json(&mut ws, json!({"type": "complete", "id": "1"})).await;
        send_json(&mut ws, json!({"type": "complete", "id": "2"})).await;
        wait_for_close(&mut ws).await;
    })
    .await;

    let client = client();
    let (first_tx, mut first) = mpsc::channel(8);
    let (second_tx, mut second) = mpsc::channel(8);
    client
        .subscribe(CancellationToken::new(), options(&url), first_tx)
        .await
        .unwrap();
    client
        .subscribe(CancellationToken::new(), options(&url), second_tx)
        .await
        .unwrap();
    assert_eq!(client.active_connections().await, 1);

    assert_eq!(first.recv().await, bytes(json!({"data": {"counter": 1}})));
    assert_eq!(second.recv().await, bytes(json!({"data": {"counter": 2}})));
    assert_eq!(first.recv().await, None);
    assert_eq!(second.recv().await, None);

    server.await.unwrap();
}

#[tokio::test]
async fn graphql_transport_ws_answers_pings_and_completes_on_cancel() {
    let (url, server) = ws_server("graphql-transport-ws", |mut ws| async move {
        assert_eq!(recv_json(&mut ws).await, json!({"type": "connection_init"}));
        send_json(&mut ws, json!({"type": "ping"})).await;
        assert_eq!(recv_json(&mut ws).await, json!({"type": "pong"}));
        send_json(&mut ws, json!({"type": "connection_ack"})).await;

        assert_eq!(
            recv_json(&mut ws).await,
            json!({"type": "subscribe", "id": "1", "payload": {"query": "subscription {counter}"}})
        );
        send_json(&mut ws, json!({"type": "ping"})).await;
        assert_eq!(recv_json(&mut ws).await, json!({"type": "pong"}));
        send_json(&mut ws, json!({"type": "next", "id": "1", "payload": {"data": {"counter": 1}}})).await;

        assert_eq!(recv_json(&mut ws).await, json!({"type": "complete", "id": "1"}));
        wait_for_close(&mut ws).await;
    })
    .await;

    let client = client();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(8);
    client.subscribe(cancel.clone(), options(&url), tx).await.unwrap();

    assert_eq!(rx.recv().await, bytes(json!({"data": {"counter": 1}})));

    cancel.cancel();
    server.await.unwrap();
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn graphql_transport_ws_error_ends_its_subscription() {
    let (url, server) = ws_server("graphql-transport-ws", |mut ws| async move {
        recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "connection_ack"})).await;
        recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "next", "id": "1", "payload": {"data": {"counter": 1}}})).await;
        send_json(&mut ws, json!({"type": "error", "id": "1", "payload": [{"message": "boom"}]})).await;
        wait_for_close(&mut ws).await;
    })
    .await;

    let (tx, mut rx) = mpsc::channel(8);
    client()
        .subscribe(CancellationToken::new(), options(&url), tx)
        .await
        .unwrap();

    assert_eq!(rx.recv().await, bytes(json!({"data": {"counter": 1}})));
    assert_eq!(rx.recv().await, bytes(json!({"errors": [{"message": "boom"}]})));
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap(),
        None
    );
    server.await.unwrap();
}

#[tokio::test]
async fn graphql_ws_error_completes_only_its_subscription() {
    let (url, server) = ws_server("graphql-ws", |mut ws| async move {
        recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "connection_ack"})).await;
        recv_json(&mut ws).await;
        recv_json(&mut ws).await;

        send_json(&mut ws, json!({"type": "error", "id": "1", "payload": [{"message": "boom"}]})).await;
        send_json(&mut ws, json!({"type": "data", "id": "2", "payload": {"data": {"counter": 2}}})).await;
        send_json(&mut ws, json!({"type": "complete", "id": "2"})).await;
        wait_for_close(&mut ws).await;
    })
    .await;

    let client = client();
    let (first_tx, mut first) = mpsc::channel(8);
    let (second_tx, mut second) = mpsc::channel(8);
    client
        .subscribe(CancellationToken::new(), options(&url), first_tx)
        .await
        .unwrap();
    client
        .subscribe(CancellationToken::new(), options(&url), second_tx)
        .await
        .unwrap();

    assert_eq!(first.recv().await, bytes(json!({"errors": [{"message": "boom"}]})));
    assert_eq!(first.recv().await, None);
    assert_eq!(second.recv().await, bytes(json!({"data": {"counter": 2}})));
    assert_eq!(second.recv().await, None);
    server.await.unwrap();
}

#[tokio::test]
async fn dropped_socket_fails_every_open_subscription() {
    let (url, server) = ws_server("graphql-ws", |mut ws| async move {
        recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "connection_ack"})).await;
        recv_json(&mut ws).await;
        recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "data", "id": "1", "payload": {"data": {"counter": 1}}})).await;
        send_json(&mut ws, json!({"type": "data", "id": "2", "payload": {"data": {"counter": 2}}})).await;
        // socket goes away without a close frame
        drop(ws);
    })
    .await;

    let client = client();
    let (first_tx, mut first) = mpsc::channel(8);
    let (second_tx, mut second) = mpsc::channel(8);
    client
        .subscribe(CancellationToken::new(), options(&url), first_tx)
        .await
        .unwrap();
    client
        .subscribe(CancellationToken::new(), options(&url), second_tx)
        .await
        .unwrap();

    assert_eq!(first.recv().await, bytes(json!({"data": {"counter": 1}})));
    assert_eq!(second.recv().await, bytes(json!({"data": {"counter": 2}})));
    for rx in [&mut first, &mut second] {
        let payload: Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
        let message = payload["errors"][0]["message"].as_str().unwrap();
        assert!(message.starts_with("websocket error"), "{message}");
        assert_eq!(rx.recv().await, None);
    }
    server.await.unwrap();
}

#[tokio::test]
async fn slow_consumer_does_not_stall_other_subscriptions() {
    let (url, server) = ws_server("graphql-ws", |mut ws| async move {
        recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "connection_ack"})).await;
        recv_json(&mut ws).await;
        recv_json(&mut ws).await;
        for counter in 1..=3 {
            send_json(&mut ws, json!({"type": "data", "id": "1", "payload": {"data": {"counter": counter}}})).await;
        }
        send_json(&mut ws, json!({"type": "data", "id": "2", "payload": {"data": {"counter": 2}}})).await;
        send_json(&mut ws, json!({"type": "complete", "id": "1"})).await;
        send_json(&mut ws, json!({"type": "complete", "id": "2"})).await;
        wait_for_close(&mut ws).await;
    })
    .await;

    let client = client();
    // never read while the connection runs
    let (stalled_tx, mut stalled) = mpsc::channel(1);
    let (second_tx, mut second) = mpsc::channel(8);
    client
        .subscribe(CancellationToken::new(), options(&url), stalled_tx)
        .await
        .unwrap();
    client
        .subscribe(CancellationToken::new(), options(&url), second_tx)
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), second.recv())
        .await
        .unwrap();
    assert_eq!(received, bytes(json!({"data": {"counter": 2}})));
    assert_eq!(second.recv().await, None);

    assert_eq!(stalled.recv().await, bytes(json!({"data": {"counter": 1}})));
    assert_eq!(stalled.recv().await, None);
    server.await.unwrap();
}

async fn connect(url: &str, protocol: &'static str) -> ClientSocket {
    let mut request = url.replacen("http://", "ws://", 1).into_client_request().unwrap();
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocol));
    let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws
}

fn subscription(url: &str, cancel: CancellationToken) -> (Subscription, mpsc::Receiver<Bytes>) {
    let (next, rx) = mpsc::channel(8);
    let sub = Subscription {
        cancel,
        options: options(url),
        next,
    };
    (sub, rx)
}

#[tokio::test]
async fn queued_subscription_keeps_connection_after_last_one_ends() {
    let (url, server) = ws_server("graphql-ws", |mut ws| async move {
        assert_eq!(recv_json(&mut ws).await["type"], "start");
        assert_eq!(recv_json(&mut ws).await, json!({"type": "stop", "id": "1"}));
        assert_eq!(recv_json(&mut ws).await["id"], "2");
        send_json(&mut ws, json!({"type": "data", "id": "2", "payload": {"data": {"counter": 2}}})).await;
        send_json(&mut ws, json!({"type": "complete", "id": "2"})).await;
        wait_for_close(&mut ws).await;
    })
    .await;

    let ws = connect(&url, "graphql-ws").await;
    let (handler, subscribe_tx) =
        WsConnectionHandler::new(ws, SubscriptionProtocol::GraphQLWs, Duration::from_millis(50));

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let (first, mut first_rx) = subscription(&url, cancelled);
    let (queued, mut queued_rx) = subscription(&url, CancellationToken::new());
    subscribe_tx.send(queued).await.unwrap();

    handler.start_blocking(CancellationToken::new(), first).await;

    assert_eq!(first_rx.recv().await, None);
    assert_eq!(queued_rx.recv().await, bytes(json!({"data": {"counter": 2}})));
    assert_eq!(queued_rx.recv().await, None);

    // a stale handle fails, so callers dial a new connection
    let (late, _late_rx) = subscription(&url, CancellationToken::new());
    assert!(subscribe_tx.send(late).await.is_err());
    server.await.unwrap();
}

#[tokio::test]
async fn queued_subscription_of_cancelled_connection_gets_an_error() {
    let (url, server) = ws_server("graphql-ws", |mut ws| async move {
        assert_eq!(recv_json(&mut ws).await["id"], "1");
        assert_eq!(recv_json(&mut ws).await, json!({"type": "stop", "id": "1"}));
        wait_for_close(&mut ws).await;
    })
    .await;

    let ws = connect(&url, "graphql-ws").await;
    let (handler, subscribe_tx) =
        WsConnectionHandler::new(ws, SubscriptionProtocol::GraphQLWs, Duration::from_millis(50));
    let (first, mut first_rx) = subscription(&url, CancellationToken::new());
    let (queued, mut queued_rx) = subscription(&url, CancellationToken::new());
    subscribe_tx.send(queued).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    handler.start_blocking(cancel, first).await;

    assert_eq!(first_rx.recv().await, bytes(json!({"errors": [{"message": "context canceled"}]})));
    assert_eq!(first_rx.recv().await, None);
    assert_eq!(queued_rx.recv().await, bytes(json!({"errors": [{"message": "connection closed"}]})));
    assert_eq!(queued_rx.recv().await, None);
    server.await.unwrap();
}

#[tokio::test]
async fn forwards_headers_and_init_payload() {
    let (url, server) = ws_server("graphql-ws", |mut ws| async move {
        assert_eq!(
            recv_json(&mut ws).await,
            json!({"type": "connection_init", "payload": {"token": "secret"}})
        );
        send_json(&mut ws, json!({"type": "connection_ack"})).await;
        recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "complete", "id": "1"})).await;
        wait_for_close(&mut ws).await;
    })
    .await;

    let on_init = |_url: &str, header: &BTreeMap<String, Vec<String>>| -> Result<Option<Value>, String> {
        let token = header
            .get("Authorization")
            .and_then(|values| values.first())
            .cloned()
            .ok_or_else(|| "missing authorization".to_string())?;
        Ok(Some(json!({ "token": token })))
    };
    let client = client().with_on_ws_connection_init(Arc::new(on_init));
    let mut options = options(&url);
    options
        .header
        .insert("Authorization".to_string(), vec!["secret".to_string()]);

    let (tx, mut rx) = mpsc::channel(8);
    client.subscribe(CancellationToken::new(), options, tx).await.unwrap();
    assert_eq!(rx.recv().await, None);
    server.await.unwrap();
}

#[tokio::test]
async fn connection_error_before_ack_fails_subscribe() {
    let (url, server) = ws_server("graphql-ws", |mut ws| async move {
        recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "connection_error", "payload": {"message": "denied"}})).await;
    })
    .await;

    let (tx, _rx) = mpsc::channel(8);
    let err = client()
        .subscribe(CancellationToken::new(), options(&url), tx)
        .await
        .unwrap_err();
    match err {
        SubscriptionError::UnexpectedAck(message_type) => assert_eq!(message_type, "connection_error"),
        other => panic!("unexpected error: {other}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn engine_shutdown_closes_connections() {
    let (url, server) = ws_server("graphql-ws", |mut ws| async move {
        recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "connection_ack"})).await;
        recv_json(&mut ws).await;
        // the client stops its subscription before closing
        assert_eq!(recv_json(&mut ws).await, json!({"type": "stop", "id": "1"}));
        wait_for_close(&mut ws).await;
    })
    .await;

    let engine = CancellationToken::new();
    let client = SubscriptionClient::new(
        reqwest::Client::new(),
        engine.clone(),
        &SubscriptionClientOptions::default(),
    );
    let (tx, mut rx) = mpsc::channel(8);
    client.subscribe(CancellationToken::new(), options(&url), tx).await.unwrap();

    engine.cancel();
    assert_eq!(rx.recv().await, bytes(json!({"errors": [{"message": "context canceled"}]})));
    assert_eq!(rx.recv().await, None);
    server.await.unwrap();
}

const EVENT_STREAM: &str = "text/event-stream";

#[tokio::test]
async fn sse_get_streams_events_until_complete() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graphql"))
        .and(query_param("query", "subscription {counter}"))
        .and(query_param("variables", r#"{"from":1}"#))
        .and(header("Accept", EVENT_STREAM))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", EVENT_STREAM).set_body_string(
            "event: next\ndata: {\"data\":{\"counter\":1}}\n\n: keep-alive\n\nevent: next\ndata: {\"data\":{\"counter\":2}}\n\nevent: complete\n\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let mut options = options(&format!("{}/graphql", server.uri()));
    options.use_sse = true;
    options.body.variables = Some(serde_json::value::RawValue::from_string(r#"{"from":1}"#.to_string()).unwrap());

    let (tx, mut rx) = mpsc::channel(8);
    client().subscribe(CancellationToken::new(), options, tx).await.unwrap();

    assert_eq!(rx.recv().await, bytes(json!({"data": {"counter": 1}})));
    assert_eq!(rx.recv().await, bytes(json!({"data": {"counter": 2}})));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn sse_post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_json(json!({"query": "subscription {counter}"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", EVENT_STREAM)
                .set_body_string("data: {\"data\":{\"counter\":1}}\n\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut options = options(&format!("{}/graphql", server.uri()));
    options.use_sse = true;
    options.sse_method_post = true;

    let (tx, mut rx) = mpsc::channel(8);
    client().subscribe(CancellationToken::new(), options, tx).await.unwrap();

    assert_eq!(rx.recv().await, bytes(json!({"data": {"counter": 1}})));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn sse_error_line_ends_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", EVENT_STREAM)
                .set_body_string(
                    "data: {\"data\":{\"counter\":1}}\n\n{\"errors\":[{\"message\":\"denied\"}]}\n\ndata: {\"data\":{\"counter\":2}}\n\n",
                ),
        )
        .mount(&server)
        .await;

    let mut options = options(&server.uri());
    options.use_sse = true;

    let (tx, mut rx) = mpsc::channel(8);
    client().subscribe(CancellationToken::new(), options, tx).await.unwrap();

    assert_eq!(rx.recv().await, bytes(json!({"data": {"counter": 1}})));
    assert_eq!(rx.recv().await, bytes(json!({"errors": [{"message": "denied"}]})));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn sse_error_status_reports_internal_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut options = options(&server.uri());
    options.use_sse = true;

    let (tx, mut rx) = mpsc::channel(8);
    client().subscribe(CancellationToken::new(), options, tx).await.unwrap();

    assert_eq!(rx.recv().await, bytes(json!({"errors": [{"message": "internal error"}]})));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn gateway_streams_planned_subscription() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/reviews"))
        .and(header("Authorization", "Bearer token"))
        .and(body_json(json!({"query": "subscription {reviewAdded {body}}"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", EVENT_STREAM)
                .set_body_string("data: {\"data\":{\"reviewAdded\":{\"body\":\"A\"}}}\n\nevent: complete\n\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = format!(
        r#"
schema: |
  type Query {{ review: Review }}
  type Subscription {{ reviewAdded: Review }}
  type Review {{ body: String! }}
data_sources:
  - name: reviews
    root_nodes:
      - type_name: Subscription
        field_names: [reviewAdded]
    child_nodes:
      - type_name: Review
        field_names: [body]
    fetch:
      url: {uri}/reviews
      header:
        Authorization: ["{{{{ .request.headers.Authorization }}}}"]
    subscription:
      protocol: sse
      sse_method_post: true
"#,
        uri = server.uri()
    );
    let config: EngineConfiguration = serde_yaml::from_str(&config).unwrap();
    let gateway = FederationGateway::from_config(config, CancellationToken::new());

    let request = GraphQLRequest {
        query: "subscription { reviewAdded { body } }".to_string(),
        ..Default::default()
    };
    let plan = gateway.plan_request(&request).await.unwrap();
    let subscription = plan.subscription.unwrap();

    let mut headers = HeaderMap::new();
    headers.insert("Authorization", "Bearer token".parse().unwrap());
    let mut trigger = gateway
        .subscribe(&subscription, &json!({}), &headers)
        .await
        .unwrap();

    assert_eq!(
        trigger.next().await,
        bytes(json!({"data": {"reviewAdded": {"body": "A"}}}))
    );
    assert_eq!(trigger.next().await, None);
    gateway.unsubscribe(&trigger).await;
}

#[tokio::test]
async fn subscription_input_without_query_is_rejected() {
    let gateway = FederationGateway::from_config(EngineConfiguration::default(), CancellationToken::new());
    let subscription = portkey_engine::planner::SubscriptionConfiguration {
        data_source: "reviews".to_string(),
        input: portkey_engine::variables::InputTemplate {
            input: r#"{"url":"http://reviews.service","body":{}}"#.to_string(),
            variables: Default::default(),
        },
        protocol: None,
    };
    let err = gateway
        .subscribe(&subscription, &json!({}), &HeaderMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::MissingQuery));
}

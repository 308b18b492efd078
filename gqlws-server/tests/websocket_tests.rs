//! End-to-end tests: the real Axum server on an ephemeral port, driven by a
//! `tokio-tungstenite` client.

mod common;

use std::{net::SocketAddr, time::Duration};

use common::*;
use futures_util::{SinkExt, StreamExt};
use gqlws_server::{GraphQlWsServer, ServerHandle};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);
const SUBPROTOCOL_HEADER: &str = "sec-websocket-protocol";

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

async fn start_server(executor: TestExecutor) -> ServerHandle {
    GraphQlWsServer::new(executor)
        .bind("127.0.0.1:0")
        .start()
        .await
        .expect("server starts")
}

async fn connect(addr: SocketAddr) -> Client {
    let mut request = format!("ws://{}/graphql", addr)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        SUBPROTOCOL_HEADER,
        HeaderValue::from_static("graphql-transport-ws"),
    );

    let (ws, response) = connect_async(request).await.expect("handshake succeeds");
    assert_eq!(
        response.headers().get(SUBPROTOCOL_HEADER).unwrap(),
        "graphql-transport-ws"
    );
    ws
}

async fn send(ws: &mut Client, message: Value) {
    ws.send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
}

async fn recv_json(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {:?}", other),
        }
    }
}

/// Read until the close frame, returning its code, reason and the text
/// frames seen before it.
async fn expect_close(ws: &mut Client) -> (u16, String, Vec<Value>) {
    let mut seen = Vec::new();
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("socket ended without a close frame")
            .expect("socket error");
        match frame {
            Message::Close(Some(frame)) => {
                return (u16::from(frame.code), frame.reason.as_str().to_owned(), seen)
            }
            Message::Text(text) => seen.push(serde_json::from_str(text.as_str()).unwrap()),
            Message::Close(None) => panic!("close frame without a code"),
            _ => continue,
        }
    }
}

async fn handshake(ws: &mut Client) {
    send(ws, connection_init()).await;
    assert_eq!(recv_json(ws).await, json!({ "type": "connection_ack" }));
}

/// Minimal HTTP/1.1 exchange; returns the raw response text.
async fn http(addr: impl ToSocketAddrs, request: String) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut raw))
        .await
        .expect("timed out reading HTTP response")
        .unwrap();
    String::from_utf8_lossy(&raw).into_owned()
}

fn sse_request(body: &str) -> String {
    format!(
        "POST /graphql/stream HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn has_event(response: &str, name: &str) -> bool {
    response
        .lines()
        .any(|line| line.strip_prefix("event:").map(str::trim) == Some(name))
}

async fn get_health(addr: SocketAddr) -> Value {
    let response = http(
        addr,
        "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n".to_string(),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    let (_, body) = response.split_once("\r\n\r\n").unwrap();
    serde_json::from_str(body).unwrap()
}

// ════════════════════════════════════════════════════════════════════
// WebSocket
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_subscription_over_websocket() {
    let server = start_server(TestExecutor::new()).await;
    let mut ws = connect(server.local_addr()).await;

    handshake(&mut ws).await;
    send(&mut ws, subscribe_ticks("123", 3)).await;
    for n in 1..=3 {
        assert_eq!(recv_json(&mut ws).await, next_ticks("123", n));
    }
    assert_eq!(recv_json(&mut ws).await, completed("123"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_subscribe_without_init_closes_with_4401() {
    let server = start_server(TestExecutor::new()).await;
    let mut ws = connect(server.local_addr()).await;

    send(&mut ws, subscribe("123", HELLO)).await;
    let (code, reason, seen) = expect_close(&mut ws).await;
    assert_eq!(code, 4401);
    assert_eq!(reason, "Unauthorized");
    assert!(seen.is_empty(), "no messages before the close: {:?}", seen);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_id_closes_with_4409() {
    let executor = TestExecutor::new();
    let server = start_server(executor.clone()).await;
    let mut ws = connect(server.local_addr()).await;

    handshake(&mut ws).await;
    send(&mut ws, subscribe("1", FOREVER)).await;
    assert_eq!(recv_json(&mut ws).await["id"], "1");
    send(&mut ws, subscribe("1", FOREVER)).await;

    let (code, reason, _) = expect_close(&mut ws).await;
    assert_eq!(code, 4409);
    assert_eq!(reason, "Subscriber for 1 already exists");
    executor.wait_for_cancelled(1).await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_complete_cancels_over_websocket() {
    let executor = TestExecutor::new();
    let server = start_server(executor.clone()).await;
    let mut ws = connect(server.local_addr()).await;

    handshake(&mut ws).await;
    send(&mut ws, subscribe("live", FOREVER)).await;
    assert_eq!(recv_json(&mut ws).await["type"], "next");

    send(&mut ws, complete("live")).await;
    executor.wait_for_cancelled(1).await;

    send(&mut ws, ping()).await;
    loop {
        let msg = recv_json(&mut ws).await;
        if msg["type"] == "pong" {
            break;
        }
        assert_eq!(msg["type"], "next");
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_disconnect_cancels_operations() {
    let executor = TestExecutor::new();
    let server = start_server(executor.clone()).await;
    let mut ws = connect(server.local_addr()).await;

    handshake(&mut ws).await;
    send(&mut ws, subscribe("a", FOREVER)).await;
    send(&mut ws, subscribe("b", FOREVER)).await;

    // Both producers are running once each has emitted.
    let mut seen = std::collections::HashSet::new();
    while seen.len() < 2 {
        let msg = recv_json(&mut ws).await;
        seen.insert(msg["id"].as_str().unwrap().to_owned());
    }

    drop(ws);
    executor.wait_for_cancelled(2).await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let server = start_server(TestExecutor::new()).await;
    let mut ws = connect(server.local_addr()).await;
    handshake(&mut ws).await;

    let stopping = tokio::spawn(server.shutdown());
    let (code, reason, _) = expect_close(&mut ws).await;
    assert_eq!(code, 1000);
    assert_eq!(reason, "Server shutting down");

    tokio::time::timeout(WAIT, stopping)
        .await
        .expect("shutdown finishes")
        .unwrap()
        .unwrap();
}

// ════════════════════════════════════════════════════════════════════
// HTTP endpoints
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_health_reports_connections_and_subscriptions() {
    let server = start_server(TestExecutor::new()).await;
    let addr = server.local_addr();

    let health = get_health(addr).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 0);
    assert_eq!(health["subscriptions"], 0);

    let mut ws = connect(addr).await;
    handshake(&mut ws).await;
    send(&mut ws, subscribe("live", FOREVER)).await;
    recv_json(&mut ws).await;

    let health = get_health(addr).await;
    assert_eq!(health["connections"], 1);
    assert_eq!(health["subscriptions"], 1);
    assert!(health["uptime_secs"].is_u64());
    assert_eq!(server.connections().connection_count(), 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sse_streams_next_then_complete() {
    let server = start_server(TestExecutor::new()).await;

    let body = json!({ "query": TICKS, "variables": { "count": 2 } }).to_string();
    let response = http(server.local_addr(), sse_request(&body)).await;

    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains("text/event-stream"), "{}", response);

    let events: Vec<&str> = response
        .lines()
        .filter_map(|line| line.strip_prefix("event:"))
        .map(str::trim)
        .collect();
    assert_eq!(events, vec!["next", "next", "complete"]);

    let data: Vec<Value> = response
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();
    assert_eq!(
        data,
        vec![json!({ "data": { "ticks": 1 } }), json!({ "data": { "ticks": 2 } })]
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sse_request_error_is_error_event() {
    let server = start_server(TestExecutor::new()).await;

    let body = json!({ "query": INVALID }).to_string();
    let response = http(server.local_addr(), sse_request(&body)).await;

    let events: Vec<&str> = response
        .lines()
        .filter_map(|line| line.strip_prefix("event:"))
        .map(str::trim)
        .collect();
    assert_eq!(events, vec!["error"]);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sse_keep_alive_pings_while_operation_is_idle() {
    let server = GraphQlWsServer::new(TestExecutor::new())
        .bind("127.0.0.1:0")
        .with_keep_alive(Some(Duration::from_millis(20)))
        .start()
        .await
        .expect("server starts");

    let body = json!({ "query": SLOW }).to_string();
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream.write_all(sse_request(&body).as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    let read_until_ping = async {
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "response ended before a ping");
            raw.extend_from_slice(&buf[..n]);
            let response = String::from_utf8_lossy(&raw);
            if has_event(&response, "ping") {
                return response.into_owned();
            }
        }
    };
    let response = tokio::time::timeout(WAIT, read_until_ping)
        .await
        .expect("no keep-alive ping");

    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(!has_event(&response, "next"), "{}", response);
    assert!(!has_event(&response, "complete"), "{}", response);

    drop(stream);
    server.shutdown().await.unwrap();
}

//! WebSocket session tests against a live server socket.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{app_state_with, harness, wait_terminal, MockRunner};
use futures::{SinkExt, StreamExt};
use owl_gateway::config::GatewayConfig;
use owl_gateway::registry::TaskStatus;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn fast_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.streaming.poll_interval_ms = 10;
    config.streaming.heartbeat_every_polls = 10_000;
    config
}

async fn spawn_server(state: owl_gateway::web::state::AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = owl_gateway::web::build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    addr
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/run/ws"))
        .await
        .expect("ws connect");
    socket
}

async fn send_json(socket: &mut WsClient, value: Value) {
    socket
        .send(Message::Text(value.to_string()))
        .await
        .expect("send");
}

async fn recv_json(socket: &mut WsClient) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame within deadline")
            .expect("connection open")
            .expect("frame");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("json frame");
        }
    }
}

async fn recv_until_type(socket: &mut WsClient, wanted: &str) -> Value {
    loop {
        let value = recv_json(socket).await;
        if value["type"] == wanted {
            return value;
        }
    }
}

#[tokio::test]
async fn ping_gets_pong() {
    let h = harness(MockRunner::Instant);
    let addr = spawn_server(app_state_with(&h, fast_config())).await;
    let mut socket = connect(addr).await;

    send_json(&mut socket, json!({"type": "ping"})).await;
    assert_eq!(recv_json(&mut socket).await["type"], "pong");
}

#[tokio::test]
async fn malformed_json_yields_error_and_connection_survives() {
    let h = harness(MockRunner::Instant);
    let addr = spawn_server(app_state_with(&h, fast_config())).await;
    let mut socket = connect(addr).await;

    socket
        .send(Message::Text("this is not json".to_string()))
        .await
        .expect("send");
    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().expect("message").contains("Invalid message"));

    // Same connection still serves requests.
    send_json(&mut socket, json!({"type": "ping"})).await;
    assert_eq!(recv_json(&mut socket).await["type"], "pong");

    send_json(&mut socket, json!({"type": "shout", "at": "the void"})).await;
    assert_eq!(recv_json(&mut socket).await["type"], "error");
}

#[tokio::test]
async fn query_streams_ack_status_and_terminal_result() {
    let h = harness(MockRunner::Instant);
    let addr = spawn_server(app_state_with(&h, fast_config())).await;
    let mut socket = connect(addr).await;

    send_json(&mut socket, json!({"type": "query", "question": "what is 2+2"})).await;
    let ack = recv_until_type(&mut socket, "ack").await;
    assert_eq!(ack["status"], "processing");
    let task_id: Uuid = ack["task_id"].as_str().expect("task_id").parse().expect("uuid");

    let status = recv_until_type(&mut socket, "status").await;
    assert_eq!(status["task_id"].as_str().expect("id"), task_id.to_string());

    let result = recv_until_type(&mut socket, "result").await;
    assert_eq!(result["status"], "completed");
    assert_eq!(result["result"]["answer"], "echo: what is 2+2");
}

#[tokio::test]
async fn cancelled_task_reaches_the_streaming_client_as_terminal() {
    let h = harness(MockRunner::Slow(Duration::from_secs(30)));
    let addr = spawn_server(app_state_with(&h, fast_config())).await;
    let mut socket = connect(addr).await;

    send_json(&mut socket, json!({"type": "query", "question": "slow one"})).await;
    let ack = recv_until_type(&mut socket, "ack").await;
    let task_id: Uuid = ack["task_id"].as_str().expect("task_id").parse().expect("uuid");

    send_json(&mut socket, json!({"type": "cancel", "task_id": task_id})).await;

    // Cancel acknowledgement, then the push loop's own terminal update.
    let reply = recv_until_type(&mut socket, "result").await;
    assert_eq!(reply["status"], "cancelled");
    let pushed = recv_until_type(&mut socket, "result").await;
    assert_eq!(pushed["status"], "cancelled");

    assert_eq!(wait_terminal(&h.registry, task_id).await, TaskStatus::Cancelled);
}

#[tokio::test]
async fn cancelling_a_settled_task_is_an_error_event() {
    let h = harness(MockRunner::Instant);
    let addr = spawn_server(app_state_with(&h, fast_config())).await;
    let mut socket = connect(addr).await;

    send_json(&mut socket, json!({"type": "query", "question": "quick"})).await;
    let ack = recv_until_type(&mut socket, "ack").await;
    let task_id: Uuid = ack["task_id"].as_str().expect("task_id").parse().expect("uuid");
    let result = recv_until_type(&mut socket, "result").await;
    assert_eq!(result["status"], "completed");

    send_json(&mut socket, json!({"type": "cancel", "task_id": task_id})).await;
    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["type"], "error");
}

//! Integration test: a real websocket client talking to a gateway script
//! through the axum router over TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pubdev_core::{ScriptPath, WorkspaceId};
use pubdev_gateway::routes::create_router;
use pubdev_host::{ExecutionHost, HostConfig, MemoryWorkspaceStore, QuickJsBackend, CLOSE_REASON};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;

const CHAT: &str = r"
const wss = require('wss');
module.exports = {
  message(client, text) { wss.broadcast(client + ': ' + text); },
  disconnect(client, reason) { shared.left = reason; },
};
";

fn ws(name: &str) -> WorkspaceId {
    WorkspaceId::new(name).unwrap_or_else(|e| panic!("bad workspace id {name}: {e}"))
}

fn path(p: &str) -> ScriptPath {
    ScriptPath::new(p).unwrap_or_else(|e| panic!("bad path {p}: {e}"))
}

async fn start(host: Arc<ExecutionHost>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap_or_else(|e| panic!("bind failed: {e}"));
    let addr = listener.local_addr().unwrap_or_else(|e| panic!("no local addr: {e}"));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, create_router(host)).await {
            panic!("server stopped: {e}");
        }
    });
    addr
}

async fn chat_host() -> Arc<ExecutionHost> {
    let w = ws("demo");
    let store = MemoryWorkspaceStore::new().with_route(&w, &path("chat.js"), CHAT);
    let host = Arc::new(ExecutionHost::new(HostConfig::default(), Arc::new(QuickJsBackend::new()), Arc::new(store)));
    host.setup_endpoint(&w, &path("chat.js"))
        .await
        .unwrap_or_else(|e| panic!("setup failed: {e}"));
    host
}

#[tokio::test]
async fn websocket_client_gets_broadcasts_and_its_close_reaches_the_script() {
    let host = chat_host().await;
    let addr = start(Arc::clone(&host)).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/pub-dev/demo/chat"))
        .await
        .unwrap_or_else(|e| panic!("connect failed: {e}"));
    socket
        .send(Message::text("hello"))
        .await
        .unwrap_or_else(|e| panic!("send failed: {e}"));

    let reply = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap_or_else(|_| panic!("no broadcast within 5s"))
        .unwrap_or_else(|| panic!("socket closed before the broadcast"))
        .unwrap_or_else(|e| panic!("read failed: {e}"));
    let text = reply.to_text().unwrap_or_else(|e| panic!("expected text: {e}"));
    assert!(text.ends_with(": hello"), "unexpected broadcast {text:?}");

    socket
        .close(Some(CloseFrame { code: CloseCode::Normal, reason: "bye".into() }))
        .await
        .unwrap_or_else(|e| panic!("close failed: {e}"));

    let w = ws("demo");
    let mut left = Value::Null;
    for _ in 0..100 {
        let shared = host.shared_state(&w).await.unwrap_or_else(|e| panic!("shared state failed: {e}"));
        left = shared["left"].clone();
        if !left.is_null() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(left, Value::from("bye"));
    let gateway = host.multiplexer().get(&w).unwrap_or_else(|| panic!("gateway closed"));
    assert!(gateway.clients().is_empty(), "client must be unregistered");
}

#[tokio::test]
async fn closing_the_gateway_sends_clients_a_close_frame() {
    let host = chat_host().await;
    let addr = start(Arc::clone(&host)).await;
    let (mut socket, _) = connect_async(format!("ws://{addr}/pub-dev/demo/chat"))
        .await
        .unwrap_or_else(|e| panic!("connect failed: {e}"));

    let w = ws("demo");
    for _ in 0..100 {
        if host.multiplexer().get(&w).is_some_and(|g| !g.clients().is_empty()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    host.cleanup_endpoint(&w, &path("chat.js"))
        .await
        .unwrap_or_else(|e| panic!("cleanup failed: {e}"));

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap_or_else(|_| panic!("no close frame within 5s"))
        .unwrap_or_else(|| panic!("socket ended without a close frame"))
        .unwrap_or_else(|e| panic!("read failed: {e}"));
    match frame {
        Message::Close(Some(frame)) => assert_eq!(frame.reason.as_str(), CLOSE_REASON),
        other => panic!("expected a close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn upgrade_without_a_gateway_is_refused() {
    let host = chat_host().await;
    let addr = start(host).await;
    let result = connect_async(format!("ws://{addr}/pub-dev/demo/elsewhere")).await;
    assert!(result.is_err(), "upgrade to a path with no gateway must fail");
}

//! WebSocket transport against a local mock node.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use carbonwatch_core::{descriptor::EventCatalog, endpoint::EndpointConfig, error::ListenerError};
use carbonwatch_evm::fingerprint::topic_hash;
use carbonwatch_stream::{
    ChannelSink, ConnectionManager, ListenerConfig, LogTransport, SessionState,
    SubscriptionRegistry, TransportEvent, WsTransport,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;

const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
/// 1000 tokens with 18 decimals
const THOUSAND: &str = "0x00000000000000000000000000000000000000000000003635c9adc5dea00000";

type Node = WebSocketStream<TcpStream>;

/// Accept one WebSocket client and run `script` against it.
/// Returns an `http://` URL so the scheme rewrite is exercised too.
async fn mock_node<F, Fut>(script: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(Node) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(ws).await;
    });
    (format!("http://{addr}"), handle)
}

async fn next_request(ws: &mut Node) -> Value {
    loop {
        match ws.next().await.expect("client went away").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

async fn send(ws: &mut Node, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

fn log_json(block: u64) -> Value {
    let topic0 = topic_hash(EventCatalog::carbon_credit().get("CreditsIssued").unwrap());
    json!({
        "address": CONTRACT,
        "topics": [
            format!("0x{}", hex::encode(topic0)),
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        ],
        "data": THOUSAND,
        "blockNumber": format!("0x{block:x}"),
        "logIndex": "0x0",
        "transactionHash": format!("0x{}", "ab".repeat(32)),
        "removed": false
    })
}

fn notification(subscription: &str, block: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": { "subscription": subscription, "result": log_json(block) }
    })
}

async fn ack_subscription(ws: &mut Node, id: &str) {
    let req = next_request(ws).await;
    assert_eq!(req["method"], "eth_subscribe");
    assert_eq!(req["params"][0], "logs");
    assert_eq!(req["params"][1]["address"].as_str().unwrap().to_lowercase(), CONTRACT);
    send(ws, json!({ "jsonrpc": "2.0", "id": req["id"], "result": id })).await;
}

// ─── Session ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_subscribes_queries_and_reports_close() {
    let (url, node) = mock_node(|mut ws| async move {
        ack_subscription(&mut ws, "0xfeed").await;
        send(&mut ws, notification("0xfeed", 7)).await;
        // Another subscription on the same socket is not ours
        send(&mut ws, notification("0xother", 99)).await;

        let req = next_request(&mut ws).await;
        assert_eq!(req["method"], "eth_getLogs");
        assert_eq!(req["params"][0]["fromBlock"], "0x3");
        assert_eq!(req["params"][0]["toBlock"], "latest");
        // A live log lands before the query response
        send(&mut ws, notification("0xfeed", 8)).await;
        send(&mut ws, json!({ "jsonrpc": "2.0", "id": req["id"], "result": [log_json(3), log_json(4)] }))
            .await;

        ws.close(Some(CloseFrame { code: CloseCode::Away, reason: "shutting down".into() }))
            .await
            .unwrap();
    })
    .await;

    let endpoint = EndpointConfig::new(CONTRACT, &url).unwrap();
    assert!(endpoint.transport_url.starts_with("ws://127.0.0.1:"));
    let mut session = WsTransport::new().connect(&endpoint).await.unwrap();
    assert_eq!(session.subscribe_logs(endpoint.address).await.unwrap(), "0xfeed");

    match session.next_event().await {
        TransportEvent::Log(raw) => assert_eq!(raw.block_number, 7),
        other => panic!("expected a log, got {other:?}"),
    }

    assert!(session.supports_history());
    let logs = session.fetch_logs(endpoint.address, 3, None).await.unwrap();
    let blocks: Vec<u64> = logs.iter().map(|l| l.block_number).collect();
    assert_eq!(blocks, [3, 4]);

    match session.next_event().await {
        TransportEvent::Log(raw) => assert_eq!(raw.block_number, 8),
        other => panic!("expected the queued log, got {other:?}"),
    }
    match session.next_event().await {
        TransportEvent::Closed { code, reason } => {
            assert_eq!(code, Some(1001));
            assert_eq!(reason, "shutting down");
        }
        other => panic!("expected close, got {other:?}"),
    }
    node.await.unwrap();
}

// ─── Listener end to end ──────────────────────────────────────────────────────

#[tokio::test]
async fn listener_prints_issued_credits_and_closes_gracefully() {
    let (url, node) = mock_node(|mut ws| async move {
        ack_subscription(&mut ws, "0x1").await;
        send(&mut ws, notification("0x1", 42)).await;
        // Wait for the client's close frame
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;

    let registry = SubscriptionRegistry::new();
    let (sink, mut rx) = ChannelSink::new(8);
    registry
        .subscribe(EventCatalog::carbon_credit().get("CreditsIssued").cloned().unwrap(), sink)
        .unwrap();
    let cancel = CancellationToken::new();
    let mut manager = ConnectionManager::new(
        EndpointConfig::new(CONTRACT, &url).unwrap(),
        ListenerConfig::default(),
        Arc::new(WsTransport::new()),
        registry,
        cancel.clone(),
    );
    let running = tokio::spawn(async move {
        let result = manager.run().await;
        (manager, result)
    });

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        event.to_string(),
        format!(
            "[CreditsIssued] to=0x0000000000000000000000000000000000000001 amount=1000.0 tx=0x{} block=42",
            "ab".repeat(32)
        )
    );

    cancel.cancel();
    let (manager, result) = running.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(manager.state(), SessionState::Closed);
    node.await.unwrap();
}

#[tokio::test]
async fn rejected_subscription_fails_the_handshake() {
    let (url, node) = mock_node(|mut ws| async move {
        let req = next_request(&mut ws).await;
        send(
            &mut ws,
            json!({ "jsonrpc": "2.0", "id": req["id"], "error": { "code": -32601, "message": "subscriptions not supported" } }),
        )
        .await;
    })
    .await;

    let registry = SubscriptionRegistry::new();
    let mut manager = ConnectionManager::new(
        EndpointConfig::new(CONTRACT, &url).unwrap(),
        ListenerConfig::default(),
        Arc::new(WsTransport::new()),
        registry,
        CancellationToken::new(),
    );
    let err = manager.run().await.unwrap_err();
    assert!(matches!(err, ListenerError::Handshake { .. }));
    assert!(err.to_string().contains("subscriptions not supported"));
    assert_eq!(err.exit_code(), 3);
    node.await.unwrap();
}

#[tokio::test]
async fn unreachable_node_fails_the_handshake() {
    // Grab a free port, then release it so nothing is listening
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut manager = ConnectionManager::new(
        EndpointConfig::new(CONTRACT, &format!("ws://127.0.0.1:{port}")).unwrap(),
        ListenerConfig::default(),
        Arc::new(WsTransport::new()),
        SubscriptionRegistry::new(),
        CancellationToken::new(),
    );
    let err = manager.run().await.unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert_eq!(manager.state(), SessionState::Failed);
}

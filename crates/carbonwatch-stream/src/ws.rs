//! `WsTransport`: Ethereum JSON-RPC over WebSocket.
//!
//! One session owns one socket. Requests (`eth_subscribe`, `eth_getLogs`)
//! are answered inline; `eth_subscription` notifications that arrive while a
//! response is awaited are queued and handed out by `next_event` in arrival
//! order.

use std::collections::VecDeque;

use alloy_primitives::Address;
use async_trait::async_trait;
use carbonwatch_core::{
    endpoint::EndpointConfig,
    error::{DecodeError, TransportError},
    event::RawLogRecord,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::transport::{LogTransport, TransportEvent, TransportSession};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to `ws://` / `wss://` JSON-RPC endpoints.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LogTransport for WsTransport {
    async fn connect(
        &self,
        endpoint: &EndpointConfig,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let url = endpoint.transport_url.clone();
        info!(url = %url, "connecting via WebSocket");
        let (stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            TransportError::ConnectionFailed { url: url.clone(), reason: e.to_string() }
        })?;
        info!(url = %url, "WebSocket connected");
        Ok(Box::new(WsSession::new(url, stream)))
    }
}

/// A single WebSocket connection.
pub struct WsSession {
    url: String,
    stream: WsStream,
    next_id: u64,
    subscription: Option<String>,
    backlog: VecDeque<Value>,
}

/// One frame off the socket, reduced to what the session cares about.
enum Incoming {
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Failed(TransportError),
    Skip,
}

impl WsSession {
    fn new(url: String, stream: WsStream) -> Self {
        Self { url, stream, next_id: 1, subscription: None, backlog: VecDeque::new() }
    }

    async fn read(&mut self) -> Incoming {
        match self.stream.next().await {
            None => Incoming::Closed { code: None, reason: "stream ended".into() },
            Some(Err(e)) => Incoming::Failed(ws_error(e)),
            Some(Ok(Message::Text(text))) => Incoming::Text(text),
            Some(Ok(Message::Ping(payload))) => {
                // Respond to server pings to keep the connection alive
                match self.stream.send(Message::Pong(payload)).await {
                    Ok(()) => Incoming::Skip,
                    Err(e) => Incoming::Failed(ws_error(e)),
                }
            }
            Some(Ok(Message::Close(frame))) => Incoming::Closed {
                code: frame.as_ref().map(|f| u16::from(f.code)),
                reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
            },
            Some(Ok(_)) => Incoming::Skip, // binary / pong
        }
    }

    /// Send a JSON-RPC request and wait for its response.
    async fn request(&mut self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id;
        self.next_id += 1;
        let req = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        debug!(url = %self.url, method, id, "sending request");
        self.stream.send(Message::Text(req.to_string())).await.map_err(ws_error)?;

        loop {
            match self.read().await {
                Incoming::Text(text) => {
                    let value: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "ignoring non-JSON message");
                            continue;
                        }
                    };
                    if is_notification(&value) {
                        self.backlog.push_back(value);
                        continue;
                    }
                    if value.get("id").and_then(Value::as_u64) != Some(id) {
                        debug!(id, "ignoring response to another request");
                        continue;
                    }
                    return parse_response(value);
                }
                Incoming::Closed { code, reason } => {
                    return Err(TransportError::ClosedByPeer { code, reason })
                }
                Incoming::Failed(e) => return Err(e),
                Incoming::Skip => {}
            }
        }
    }

    /// Turn a notification into an event if it belongs to our subscription.
    fn notification_event(&self, value: &Value) -> Option<TransportEvent> {
        let subscription = self.subscription.as_deref()?;
        match parse_notification(value, subscription)? {
            Ok(raw) => Some(TransportEvent::Log(raw)),
            Err(e) => Some(TransportEvent::Invalid(e)),
        }
    }
}

#[async_trait]
impl TransportSession for WsSession {
    async fn subscribe_logs(&mut self, address: Address) -> Result<String, TransportError> {
        let result = self.request("eth_subscribe", json!(["logs", { "address": address }])).await?;
        let id = result
            .as_str()
            .ok_or_else(|| TransportError::Protocol(format!("subscription id is not a string: {result}")))?
            .to_string();
        info!(url = %self.url, subscription = %id, %address, "log subscription active");
        self.subscription = Some(id.clone());
        Ok(id)
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            while let Some(value) = self.backlog.pop_front() {
                if let Some(event) = self.notification_event(&value) {
                    return event;
                }
            }
            match self.read().await {
                Incoming::Text(text) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => {
                        if let Some(event) = self.notification_event(&value) {
                            return event;
                        }
                        debug!("ignoring message outside the log subscription");
                    }
                    Err(e) => {
                        return TransportEvent::Invalid(DecodeError::InvalidRawLog {
                            reason: format!("non-JSON message: {e}"),
                        })
                    }
                },
                Incoming::Closed { code, reason } => return TransportEvent::Closed { code, reason },
                Incoming::Failed(e) => return TransportEvent::Error(e),
                Incoming::Skip => {}
            }
        }
    }

    fn supports_history(&self) -> bool {
        true
    }

    async fn fetch_logs(
        &mut self,
        address: Address,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<RawLogRecord>, TransportError> {
        let to_block = match to {
            Some(n) => format!("0x{n:x}"),
            None => "latest".to_string(),
        };
        let filter = json!({ "address": address, "fromBlock": format!("0x{from:x}"), "toBlock": to_block });
        let result = self.request("eth_getLogs", json!([filter])).await?;
        let entries = result
            .as_array()
            .ok_or_else(|| TransportError::Protocol("eth_getLogs result is not an array".into()))?;

        let mut logs = Vec::with_capacity(entries.len());
        for entry in entries {
            match RawLogRecord::from_json(entry) {
                Ok(raw) => logs.push(raw),
                Err(e) => warn!(error = %e, "skipping malformed historical log"),
            }
        }
        debug!(from, to = %to_block, count = logs.len(), "historical query complete");
        Ok(logs)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        info!(url = %self.url, "closing WebSocket");
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(ws_error(e)),
        }
    }
}

fn ws_error(e: tungstenite::Error) -> TransportError {
    TransportError::WebSocket(e.to_string())
}

fn is_notification(value: &Value) -> bool {
    value.get("method").and_then(Value::as_str) == Some("eth_subscription")
}

fn parse_response(value: Value) -> Result<Value, TransportError> {
    if let Some(err) = value.get("error") {
        return Err(TransportError::Rpc {
            code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: err.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
        });
    }
    value
        .get("result")
        .cloned()
        .ok_or_else(|| TransportError::Protocol(format!("response has neither result nor error: {value}")))
}

/// Parse an `eth_subscription` notification for `subscription`.
/// Returns `None` for anything else (responses, other subscriptions).
fn parse_notification(
    value: &Value,
    subscription: &str,
) -> Option<Result<RawLogRecord, DecodeError>> {
    if !is_notification(value) {
        return None;
    }
    let params = value.get("params")?;
    if params.get("subscription")?.as_str()? != subscription {
        return None;
    }
    Some(match params.get("result") {
        Some(result) => RawLogRecord::from_json(result),
        None => Err(DecodeError::InvalidRawLog { reason: "notification has no result".into() }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(subscription: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": subscription,
                "result": {
                    "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
                    "topics": ["0xba27001eed39081e9d6f521103bc201676a9b4eb7fe868e5e596da78b135126b"],
                    "data": "0x",
                    "blockNumber": "0x10",
                    "logIndex": "0x0",
                    "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111"
                }
            }
        })
    }

    #[test]
    fn parses_own_subscription() {
        let raw = parse_notification(&notification("0xabc"), "0xabc").unwrap().unwrap();
        assert_eq!(raw.block_number, 16);
    }

    #[test]
    fn ignores_other_subscriptions_and_responses() {
        assert!(parse_notification(&notification("0xother"), "0xabc").is_none());
        let ack = json!({ "jsonrpc": "2.0", "id": 1, "result": "0xabc" });
        assert!(parse_notification(&ack, "0xabc").is_none());
    }

    #[test]
    fn malformed_result_is_invalid() {
        let mut v = notification("0xabc");
        v["params"]["result"]["topics"] = json!("nope");
        assert!(matches!(
            parse_notification(&v, "0xabc"),
            Some(Err(DecodeError::InvalidRawLog { .. }))
        ));
    }

    #[test]
    fn rpc_error_is_surfaced() {
        let v = json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32601, "message": "method not found" } });
        assert!(matches!(
            parse_response(v),
            Err(TransportError::Rpc { code: -32601, .. })
        ));
    }
}

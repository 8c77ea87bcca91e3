//! Transport capability traits.
//!
//! A [`LogTransport`] opens sessions; a [`TransportSession`] pushes raw log
//! records for one subscription and, optionally, answers historical queries.
//! The connection manager only ever talks to these traits, so the WebSocket
//! transport and the in-memory transport are interchangeable.

use alloy_primitives::Address;
use async_trait::async_trait;
use carbonwatch_core::{
    endpoint::EndpointConfig,
    error::{DecodeError, TransportError},
    event::RawLogRecord,
};

/// What a session yields next.
#[derive(Debug)]
pub enum TransportEvent {
    /// A log pushed by the node
    Log(RawLogRecord),
    /// A notification that could not be parsed into a log record
    Invalid(DecodeError),
    /// The peer closed the connection
    Closed { code: Option<u16>, reason: String },
    /// The connection failed
    Error(TransportError),
}

/// Opens sessions against an endpoint.
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Establish the underlying connection. Does not subscribe.
    async fn connect(
        &self,
        endpoint: &EndpointConfig,
    ) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// One live connection.
#[async_trait]
pub trait TransportSession: Send {
    /// Issue the log subscription for `address` and wait for its
    /// acknowledgement. Returns the node's subscription id.
    async fn subscribe_logs(&mut self, address: Address) -> Result<String, TransportError>;

    /// Wait for the next pushed record or connection change.
    /// Must be cancellation safe: dropping the future loses no record.
    async fn next_event(&mut self) -> TransportEvent;

    /// Whether [`fetch_logs`](Self::fetch_logs) is available.
    fn supports_history(&self) -> bool {
        false
    }

    /// Historical query: logs of `address` from block `from` to `to`
    /// (`None` = latest), inclusive.
    async fn fetch_logs(
        &mut self,
        _address: Address,
        _from: u64,
        _to: Option<u64>,
    ) -> Result<Vec<RawLogRecord>, TransportError> {
        Err(TransportError::Unsupported)
    }

    /// Graceful shutdown.
    async fn close(&mut self) -> Result<(), TransportError>;
}

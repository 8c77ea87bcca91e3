//! Error types for the CarbonWatch listener.
//!
//! Only [`ConfigError`], handshake failures and post-handshake
//! [`TransportError`]s terminate the process. [`SchemaError`] rejects a single
//! subscription, [`DecodeError`] drops a single record and [`SinkError`] loses
//! a single event; all three are logged and contained.

use thiserror::Error;

/// Bad or missing endpoint settings. Reported before any connection attempt.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {key}")]
    Missing { key: &'static str },

    #[error("invalid contract address '{value}': {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("invalid transport URL '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },

    #[error("unsupported transport scheme '{scheme}' (expected http, https, ws or wss)")]
    UnsupportedScheme { scheme: String },
}

/// A descriptor that cannot be matched against the emitted log layout.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cannot parse event fragment '{fragment}': {reason}")]
    Parse { fragment: String, reason: String },

    #[error("unsupported field type '{ty}'")]
    UnsupportedType { ty: String },

    #[error("event '{event}': duplicate field name '{field}'")]
    DuplicateField { event: String, field: String },

    #[error("event '{event}': field #{index} has no name")]
    UnnamedField { event: String, index: usize },

    #[error("event '{event}': field '{field}' declares {decimals} decimals (at most 77 fit in uint256)")]
    DecimalsOutOfRange { event: String, field: String, decimals: u8 },

    #[error("event '{event}' declares {count} indexed fields (at most 3 fit in log topics)")]
    TooManyIndexed { event: String, count: usize },

    #[error("event '{name}' is already registered with a different shape")]
    DuplicateEvent { name: String },

    #[error("event '{name}' is not declared by the contract interface")]
    UnknownEvent { name: String },

    #[error("event '{name}': signature {expected} expected by the contract, descriptor has {actual}")]
    SignatureMismatch { name: String, expected: String, actual: String },

    #[error("event '{name}': contract emits {expected_indexed} indexed / {expected_data} data fields, descriptor declares {indexed} / {data}")]
    LayoutMismatch {
        name: String,
        expected_indexed: usize,
        expected_data: usize,
        indexed: usize,
        data: usize,
    },

    #[error("invalid contract ABI: {0}")]
    InvalidAbi(String),
}

/// A single record failed to decode. The record is dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingSignature,

    #[error("no registered descriptor for topic {topic}")]
    UnknownEvent { topic: String },

    #[error("event '{event}': expected {expected} topics, got {got}")]
    TopicCount { event: String, expected: usize, got: usize },

    #[error("field '{field}': value does not fit declared type {ty}")]
    Overflow { field: String, ty: String },

    #[error("ABI decode failed: {reason}")]
    AbiDecodeFailed { reason: String },

    #[error("invalid raw log: {reason}")]
    InvalidRawLog { reason: String },
}

/// A consumer failed to take an event. The event is lost; the session continues.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("sink is full")]
    Full,

    #[error("sink receiver has been dropped")]
    Closed,

    #[error("sink panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// Transport-level failures: the socket, the framing or the JSON-RPC protocol.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection closed by peer (code {code:?}): {reason}")]
    ClosedByPeer { code: Option<u16>, reason: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("historical log queries are not supported by this transport")]
    Unsupported,
}

/// Top-level listener failure, mapped to a process exit code by the CLI.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("handshake with {url} failed: {reason}")]
    Handshake { url: String, reason: String },

    #[error("handshake with {url} timed out after {ms}ms")]
    HandshakeTimeout { url: String, ms: u64 },

    #[error("transport failed after session became active: {0}")]
    Transport(#[from] TransportError),

    #[error("reconnect gave up after {attempts} attempts: {last}")]
    ReconnectExhausted { attempts: u32, last: String },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}

impl ListenerError {
    /// Returns `true` if this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Schema(_))
    }

    /// Process exit status reported for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Handshake { .. } | Self::HandshakeTimeout { .. } => 3,
            Self::Transport(_) | Self::ReconnectExhausted { .. } => 4,
            Self::Schema(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_non_zero() {
        let config = ListenerError::Config(ConfigError::Missing { key: "CONTRACT_ADDRESS" });
        let handshake = ListenerError::HandshakeTimeout { url: "ws://x".into(), ms: 10 };
        let transport = ListenerError::Transport(TransportError::ClosedByPeer {
            code: Some(1006),
            reason: "abnormal".into(),
        });
        assert_eq!(config.exit_code(), 2);
        assert_eq!(handshake.exit_code(), 3);
        assert_eq!(transport.exit_code(), 4);
        assert!(config.is_fatal() && handshake.is_fatal() && transport.is_fatal());
    }

    #[test]
    fn schema_errors_are_contained() {
        let err = ListenerError::from(SchemaError::UnknownEvent { name: "Foo".into() });
        assert!(!err.is_fatal());
    }

    #[test]
    fn missing_key_is_named_in_message() {
        let err = ConfigError::Missing { key: "CONTRACT_ADDRESS" };
        assert!(err.to_string().contains("CONTRACT_ADDRESS"));
    }
}

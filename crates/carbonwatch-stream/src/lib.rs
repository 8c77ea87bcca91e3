//! # carbonwatch-stream
//!
//! The contract log listener.
//!
//! Connects to a JSON-RPC streaming endpoint, subscribes to the contract's
//! logs, routes each raw record through the subscription registry, decodes
//! it, and hands the typed event to every subscribed sink.
//!
//! ## Architecture
//! ```text
//! LogTransport::connect ─▶ TransportSession (eth_subscribe "logs")
//!       │
//!       ▼
//! ConnectionManager (state machine, cancellation, reconnect + backfill)
//!       │  RawLogRecord
//!       ▼
//! SubscriptionRegistry (topic0 → descriptor, strict decode)
//!       │  DecodedEvent
//!       ▼
//! EventSink (LineSink, ChannelSink, closures)
//! ```

pub mod config;
pub mod memory;
pub mod policy;
pub mod registry;
pub mod session;
pub mod sink;
pub mod transport;
pub mod ws;

pub use config::{ListenerConfig, ReconnectConfig};
pub use memory::{MemoryFeed, MemoryTransport};
pub use registry::{Dispatch, SubscriptionHandle, SubscriptionRegistry};
pub use session::{ConnectionManager, ListenerMetrics, SessionState};
pub use sink::{ChannelSink, EventSink, LineFormat, LineSink};
pub use transport::{LogTransport, TransportEvent, TransportSession};
pub use ws::WsTransport;

//! # carbonwatch-core
//!
//! Core types shared across all CarbonWatch crates: the endpoint the listener
//! connects to, the catalog of event descriptors it knows how to decode,
//! raw and decoded log records, and the error taxonomy that decides which
//! failures are fatal and which are contained.

pub mod descriptor;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod types;

pub use descriptor::{EventCatalog, EventDescriptor, FieldDef, FieldType};
pub use endpoint::EndpointConfig;
pub use error::{ConfigError, DecodeError, ListenerError, SchemaError, SinkError, TransportError};
pub use event::{DecodedEvent, LogPosition, RawLogRecord};
pub use types::{FieldValue, TokenAmount};

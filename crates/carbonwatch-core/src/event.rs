//! Raw and decoded log records.

use crate::error::DecodeError;
use crate::types::FieldValue;
use alloy_primitives::{Address, Bytes, B256};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw, undecoded log as pushed by the transport (`eth_subscription`) or
/// returned by a historical query (`eth_getLogs`). Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLogRecord {
    /// Contract that emitted the log
    pub address: Address,
    /// topics[0] is the event signature hash; topics[1..] are indexed params
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed params
    pub data: Bytes,
    pub transaction_hash: B256,
    #[serde(with = "quantity")]
    pub block_number: u64,
    #[serde(with = "quantity")]
    pub log_index: u64,
    /// Set by the node when a log is reverted by a reorg
    #[serde(default)]
    pub removed: bool,
}

impl RawLogRecord {
    /// Parse a JSON log object in Ethereum JSON-RPC format.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, DecodeError> {
        Self::deserialize(value).map_err(|e| DecodeError::InvalidRawLog { reason: e.to_string() })
    }

    /// topics[0], the event signature hash.
    pub fn signature_topic(&self) -> Option<&B256> {
        self.topics.first()
    }

    pub fn position(&self) -> LogPosition {
        LogPosition { block_number: self.block_number, log_index: self.log_index }
    }
}

/// Position of a log in the chain. Ordered by block, then log index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// A fully decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedEvent {
    /// Descriptor name, e.g. "CreditsIssued"
    pub kind: String,
    /// Decoded values in declaration order
    pub fields: IndexMap<String, FieldValue>,
    #[serde(rename = "tx")]
    pub transaction_hash: B256,
    #[serde(rename = "block")]
    pub block_number: u64,
    pub log_index: u64,
    pub address: Address,
}

impl DecodedEvent {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn position(&self) -> LogPosition {
        LogPosition { block_number: self.block_number, log_index: self.log_index }
    }
}

/// The stable one-line rendering consumed by downstream log parsers:
/// `[Kind] name=value ... tx=0x.. block=N`.
impl fmt::Display for DecodedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        for (name, value) in &self.fields {
            write!(f, " {name}={value}")?;
        }
        write!(
            f,
            " tx=0x{} block={}",
            hex::encode(self.transaction_hash),
            self.block_number
        )
    }
}

/// JSON-RPC quantities: `"0x1a"` on the wire, plain numbers accepted too.
mod quantity {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Quantity {
        Hex(String),
        Num(u64),
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{value:x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Quantity::deserialize(deserializer)? {
            Quantity::Num(n) => Ok(n),
            Quantity::Hex(s) => {
                let digits = s
                    .strip_prefix("0x")
                    .ok_or_else(|| de::Error::custom(format!("quantity '{s}' lacks 0x prefix")))?;
                u64::from_str_radix(digits, 16).map_err(de::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenAmount;
    use alloy_primitives::U256;

    fn sample_log_json() -> serde_json::Value {
        serde_json::json!({
            "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "topics": [
                "0xba27001eed39081e9d6f521103bc201676a9b4eb7fe868e5e596da78b135126b",
                "0x0000000000000000000000000000000000000000000000000000000000000001"
            ],
            "data": "0x00000000000000000000000000000000000000000000003635c9adc5dea00000",
            "blockNumber": "0x1234",
            "logIndex": "0x2",
            "transactionHash": "0xabababababababababababababababababababababababababababababababab",
            "removed": false
        })
    }

    #[test]
    fn parses_rpc_log_object() {
        let raw = RawLogRecord::from_json(&sample_log_json()).unwrap();
        assert_eq!(raw.block_number, 0x1234);
        assert_eq!(raw.log_index, 2);
        assert_eq!(raw.topics.len(), 2);
        assert_eq!(raw.data.len(), 32);
        assert!(!raw.removed);
    }

    #[test]
    fn rejects_pending_logs_without_block() {
        let mut v = sample_log_json();
        v["blockNumber"] = serde_json::Value::Null;
        assert!(matches!(
            RawLogRecord::from_json(&v),
            Err(DecodeError::InvalidRawLog { .. })
        ));
    }

    #[test]
    fn serializes_quantities_as_hex() {
        let raw = RawLogRecord::from_json(&sample_log_json()).unwrap();
        let v = serde_json::to_value(&raw).unwrap();
        assert_eq!(v["blockNumber"], "0x1234");
        assert_eq!(RawLogRecord::from_json(&v).unwrap(), raw);
    }

    #[test]
    fn positions_order_by_block_then_index() {
        let a = LogPosition { block_number: 5, log_index: 9 };
        let b = LogPosition { block_number: 6, log_index: 0 };
        let c = LogPosition { block_number: 6, log_index: 1 };
        assert!(a < b && b < c);
    }

    #[test]
    fn decoded_event_line_format() {
        let to: Address = "0x0000000000000000000000000000000000000001".parse().unwrap();
        let mut fields = IndexMap::new();
        fields.insert("to".to_string(), FieldValue::Address(to));
        fields.insert(
            "amount".to_string(),
            FieldValue::Amount(TokenAmount::new(
                U256::from(1000u64) * U256::from(10u64).pow(U256::from(18u64)),
                18,
            )),
        );
        let event = DecodedEvent {
            kind: "CreditsIssued".into(),
            fields,
            transaction_hash: B256::repeat_byte(0xab),
            block_number: 42,
            log_index: 0,
            address: Address::ZERO,
        };
        let line = event.to_string();
        assert!(line.starts_with(
            "[CreditsIssued] to=0x0000000000000000000000000000000000000001 amount=1000.0 tx=0xabab"
        ));
        assert!(line.ends_with(" block=42"));
    }
}

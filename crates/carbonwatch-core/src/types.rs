//! Typed field values produced by decoding.

use alloy_primitives::{Address, B256, I256, U256};
use serde::{Serialize, Serializer};
use std::fmt;

/// An unsigned amount with a fixed number of decimals, rendered as a
/// fixed-point decimal (`1000.0`, `0.25`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    /// Raw integer value as emitted on chain
    pub raw: U256,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.raw, self.decimals))
    }
}

/// Format `raw` as a decimal with `decimals` fractional digits, trimming
/// trailing zeros but always keeping one fractional digit.
pub fn format_units(raw: U256, decimals: u8) -> String {
    let base = U256::from(10u64).pow(U256::from(decimals));
    let (whole, frac) = raw.div_rem(base);
    let digits = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    let trimmed = digits.trim_end_matches('0');
    if trimmed.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{trimmed}")
    }
}

/// A decoded event field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Uint(U256),
    Int(I256),
    Bool(bool),
    /// 20-byte address, displayed EIP-55 checksummed
    Address(Address),
    /// bytes1..bytes32, exactly N bytes
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    Str(String),
    /// Unsigned value with a declared display precision
    Amount(TokenAmount),
    /// keccak256 of an indexed `bytes`/`string` value (the value itself is
    /// not recoverable from the log)
    Hash(B256),
}

impl FieldValue {
    pub fn as_address(&self) -> Option<&Address> {
        match self {
            FieldValue::Address(a) => Some(a),
            _ => None,
        }
    }

    /// Raw unsigned value of a `Uint` or `Amount`.
    pub fn as_u256(&self) -> Option<U256> {
        match self {
            FieldValue::Uint(v) => Some(*v),
            FieldValue::Amount(a) => Some(a.raw),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Uint(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Address(a) => write!(f, "{}", a.to_checksum(None)),
            FieldValue::FixedBytes(b) | FieldValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            FieldValue::Str(s) => write!(f, "{s}"),
            FieldValue::Amount(a) => write!(f, "{a}"),
            FieldValue::Hash(h) => write!(f, "0x{}", hex::encode(h)),
        }
    }
}

/// Values serialize as their display string so JSON output matches the text
/// output exactly (no float conversion of 256-bit amounts).
impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

//! Event descriptors: the declared name and field layout of each event kind
//! the listener knows how to decode.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Maximum number of indexed parameters an EVM log can carry (topics[1..=3]).
pub const MAX_INDEXED: usize = 3;

/// Decimal precision of the carbon credit token.
pub const TOKEN_DECIMALS: u8 = 18;

/// Largest `decimals` whose scale `10^decimals` fits in a `uint256`.
pub const MAX_DECIMALS: u8 = 77;

/// Solidity value types supported in event fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    /// Unsigned integer, width in bits (8..=256, multiple of 8)
    Uint(u16),
    /// Signed integer, width in bits (8..=256, multiple of 8)
    Int(u16),
    Bool,
    /// 20-byte EVM address
    Address,
    /// Fixed-size byte array, length in bytes (1..=32)
    FixedBytes(u8),
    /// Variable-length byte array
    Bytes,
    /// UTF-8 string
    String,
}

impl FieldType {
    /// Reference types are stored as their keccak256 hash when indexed.
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Bytes | FieldType::String)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Uint(bits) => write!(f, "uint{bits}"),
            FieldType::Int(bits) => write!(f, "int{bits}"),
            FieldType::Bool => write!(f, "bool"),
            FieldType::Address => write!(f, "address"),
            FieldType::FixedBytes(n) => write!(f, "bytes{n}"),
            FieldType::Bytes => write!(f, "bytes"),
            FieldType::String => write!(f, "string"),
        }
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || SchemaError::UnsupportedType { ty: s.to_string() };
        let int_width = |digits: &str| -> Result<u16, SchemaError> {
            if digits.is_empty() {
                return Ok(256);
            }
            let bits: u16 = digits.parse().map_err(|_| unsupported())?;
            if bits == 0 || bits > 256 || bits % 8 != 0 {
                return Err(unsupported());
            }
            Ok(bits)
        };

        match s {
            "bool" => Ok(FieldType::Bool),
            "address" => Ok(FieldType::Address),
            "bytes" => Ok(FieldType::Bytes),
            "string" => Ok(FieldType::String),
            _ => {
                if let Some(digits) = s.strip_prefix("uint") {
                    Ok(FieldType::Uint(int_width(digits)?))
                } else if let Some(digits) = s.strip_prefix("int") {
                    Ok(FieldType::Int(int_width(digits)?))
                } else if let Some(digits) = s.strip_prefix("bytes") {
                    let n: u8 = digits.parse().map_err(|_| unsupported())?;
                    if n == 0 || n > 32 {
                        return Err(unsupported());
                    }
                    Ok(FieldType::FixedBytes(n))
                } else {
                    Err(unsupported())
                }
            }
        }
    }
}

impl TryFrom<String> for FieldType {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FieldType> for String {
    fn from(ty: FieldType) -> Self {
        ty.to_string()
    }
}

/// Definition of a single event field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    /// Carried in topics[1..] rather than in the data payload
    #[serde(default)]
    pub indexed: bool,
    /// Render unsigned values as fixed-point with this many decimals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

impl FieldDef {
    /// An indexed (topic) field.
    pub fn indexed(name: impl Into<String>, ty: FieldType) -> Self {
        Self { name: name.into(), ty, indexed: true, decimals: None }
    }

    /// A non-indexed (data payload) field.
    pub fn data(name: impl Into<String>, ty: FieldType) -> Self {
        Self { name: name.into(), ty, indexed: false, decimals: None }
    }

    /// Render this field as a token amount with `decimals` places.
    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = Some(decimals);
        self
    }
}

/// The declared name and ordered field layout of one event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Solidity event name, e.g. "CreditsIssued"
    pub name: String,
    /// Fields in declaration order (order matters for ABI decode)
    pub fields: Vec<FieldDef>,
}

impl EventDescriptor {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self { name: name.into(), fields }
    }

    /// Parse a human-readable ABI fragment, e.g.
    /// `event CreditsIssued(address indexed to, uint256 amount)`.
    pub fn parse(fragment: &str) -> Result<Self, SchemaError> {
        let parse_err = |reason: &str| SchemaError::Parse {
            fragment: fragment.to_string(),
            reason: reason.to_string(),
        };

        let text = fragment.trim().trim_end_matches(';').trim();
        let text = text.strip_prefix("event ").unwrap_or(text).trim();

        let open = text.find('(').ok_or_else(|| parse_err("missing '('"))?;
        let close = text.rfind(')').ok_or_else(|| parse_err("missing ')'"))?;
        if close < open {
            return Err(parse_err("unbalanced parentheses"));
        }
        let trailer = text[close + 1..].trim();
        if trailer == "anonymous" {
            return Err(parse_err("anonymous events carry no signature topic"));
        }
        if !trailer.is_empty() {
            return Err(parse_err("unexpected text after ')'"));
        }

        let name = text[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(parse_err("invalid event name"));
        }

        let params = text[open + 1..close].trim();
        let mut fields = Vec::new();
        if !params.is_empty() {
            for (index, param) in params.split(',').enumerate() {
                let tokens: Vec<&str> = param.split_whitespace().collect();
                let (ty, rest) = tokens
                    .split_first()
                    .ok_or_else(|| parse_err("empty parameter"))?;
                if ty.contains('(') || ty.contains('[') {
                    return Err(SchemaError::UnsupportedType { ty: ty.to_string() });
                }
                let ty: FieldType = ty.parse()?;
                let (indexed, rest) = match rest.split_first() {
                    Some((&"indexed", tail)) => (true, tail),
                    _ => (false, rest),
                };
                let field_name = match rest {
                    [] => String::new(),
                    [n] => n.to_string(),
                    _ => return Err(parse_err("too many tokens in parameter")),
                };
                if field_name.is_empty() {
                    return Err(SchemaError::UnnamedField { event: name.to_string(), index });
                }
                fields.push(FieldDef { name: field_name, ty, indexed, decimals: None });
            }
        }

        let descriptor = Self::new(name, fields);
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Set the display precision of `field`; no-op if the field is unknown.
    pub fn with_decimals(mut self, field: &str, decimals: u8) -> Self {
        if let Some(f) = self.fields.iter_mut().find(|f| f.name == field) {
            f.decimals = Some(decimals);
        }
        self
    }

    /// Canonical signature, e.g. `CreditsIssued(address,uint256)`.
    pub fn signature(&self) -> String {
        let types: Vec<String> = self.fields.iter().map(|f| f.ty.to_string()).collect();
        format!("{}({})", self.name, types.join(","))
    }

    /// Fields carried in topics[1..], in declaration order.
    pub fn indexed_fields(&self) -> Vec<&FieldDef> {
        self.fields.iter().filter(|f| f.indexed).collect()
    }

    /// Fields carried in the data payload, in declaration order.
    pub fn data_fields(&self) -> Vec<&FieldDef> {
        self.fields.iter().filter(|f| !f.indexed).collect()
    }

    /// Structural checks that do not depend on any contract interface.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for (index, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(SchemaError::UnnamedField { event: self.name.clone(), index });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    event: self.name.clone(),
                    field: field.name.clone(),
                });
            }
            if let Some(decimals) = field.decimals.filter(|d| *d > MAX_DECIMALS) {
                return Err(SchemaError::DecimalsOutOfRange {
                    event: self.name.clone(),
                    field: field.name.clone(),
                    decimals,
                });
            }
        }
        let indexed = self.indexed_fields().len();
        if indexed > MAX_INDEXED {
            return Err(SchemaError::TooManyIndexed { event: self.name.clone(), count: indexed });
        }
        Ok(())
    }

    /// Same name and field layout, ignoring display hints.
    pub fn same_shape(&self, other: &EventDescriptor) -> bool {
        self.name == other.name
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.name == b.name && a.ty == b.ty && a.indexed == b.indexed)
    }
}

impl fmt::Display for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .fields
            .iter()
            .map(|p| {
                if p.indexed {
                    format!("{} indexed {}", p.ty, p.name)
                } else {
                    format!("{} {}", p.ty, p.name)
                }
            })
            .collect();
        write!(f, "event {}({})", self.name, params.join(", "))
    }
}

/// A caller-supplied catalog of descriptors. Names are unique.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventCatalog {
    descriptors: Vec<EventDescriptor>,
}

impl EventCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three events emitted by the CarbonCredit contract.
    pub fn carbon_credit() -> Self {
        let mut catalog = Self::new();
        let entries = [
            EventDescriptor::new(
                "CreditsIssued",
                vec![
                    FieldDef::indexed("to", FieldType::Address),
                    FieldDef::data("amount", FieldType::Uint(256)).with_decimals(TOKEN_DECIMALS),
                ],
            ),
            EventDescriptor::new(
                "CreditsRetired",
                vec![
                    FieldDef::indexed("from", FieldType::Address),
                    FieldDef::data("amount", FieldType::Uint(256)).with_decimals(TOKEN_DECIMALS),
                ],
            ),
            EventDescriptor::new(
                "CarbonOffsetted",
                vec![
                    FieldDef::indexed("user", FieldType::Address),
                    FieldDef::data("tons", FieldType::Uint(256)),
                    FieldDef::data("tokensUsed", FieldType::Uint(256))
                        .with_decimals(TOKEN_DECIMALS),
                ],
            ),
        ];
        for descriptor in entries {
            catalog.descriptors.push(descriptor);
        }
        catalog
    }

    /// Build a catalog from human-readable fragments.
    pub fn from_fragments<'a>(
        fragments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, SchemaError> {
        let mut catalog = Self::new();
        for fragment in fragments {
            catalog.insert(EventDescriptor::parse(fragment)?)?;
        }
        Ok(catalog)
    }

    /// Add a descriptor. Fails if the name is already taken.
    pub fn insert(&mut self, descriptor: EventDescriptor) -> Result<(), SchemaError> {
        descriptor.validate()?;
        if self.get(&descriptor.name).is_some() {
            return Err(SchemaError::DuplicateEvent { name: descriptor.name });
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&EventDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl<'a> IntoIterator for &'a EventCatalog {
    type Item = &'a EventDescriptor;
    type IntoIter = std::slice::Iter<'a, EventDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.descriptors.iter()
    }
}

//! Contract ABI interface checks.
//!
//! When the contract's JSON ABI is available, a descriptor is only accepted
//! if the contract declares an event with the same name, the same signature
//! hash and the same indexed / non-indexed layout.

use std::path::Path;

use alloy_json_abi::{Event, JsonAbi};
use carbonwatch_core::{descriptor::EventDescriptor, error::SchemaError};

use crate::fingerprint::topic_hash;

/// The event surface of a deployed contract, loaded from its JSON ABI.
#[derive(Debug, Clone)]
pub struct ContractInterface {
    abi: JsonAbi,
}

impl ContractInterface {
    pub fn new(abi: JsonAbi) -> Self {
        Self { abi }
    }

    /// Parse a bare ABI array or a Hardhat/Foundry artifact with an `abi` key.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| SchemaError::InvalidAbi(e.to_string()))?;
        let abi_value = match value {
            serde_json::Value::Object(mut artifact) => artifact
                .remove("abi")
                .ok_or_else(|| SchemaError::InvalidAbi("artifact has no 'abi' key".into()))?,
            array @ serde_json::Value::Array(_) => array,
            _ => return Err(SchemaError::InvalidAbi("expected an array or an artifact object".into())),
        };
        let abi: JsonAbi =
            serde_json::from_value(abi_value).map_err(|e| SchemaError::InvalidAbi(e.to_string()))?;
        Ok(Self::new(abi))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::InvalidAbi(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Names of all events the contract declares.
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.abi.events.keys().map(String::as_str)
    }

    /// Verify that `descriptor` matches an event the contract actually emits.
    pub fn check(&self, descriptor: &EventDescriptor) -> Result<(), SchemaError> {
        let candidates = self
            .abi
            .event(&descriptor.name)
            .filter(|events| !events.is_empty())
            .ok_or_else(|| SchemaError::UnknownEvent { name: descriptor.name.clone() })?;

        let actual = descriptor.signature();
        let declared = candidates
            .iter()
            .find(|event| event.signature() == actual)
            .ok_or_else(|| SchemaError::SignatureMismatch {
                name: descriptor.name.clone(),
                expected: candidates
                    .iter()
                    .map(Event::signature)
                    .collect::<Vec<_>>()
                    .join(" | "),
                actual: actual.clone(),
            })?;

        if declared.anonymous || declared.selector() != topic_hash(descriptor) {
            return Err(SchemaError::SignatureMismatch {
                name: descriptor.name.clone(),
                expected: declared.signature(),
                actual,
            });
        }

        let layout_matches = declared.inputs.len() == descriptor.fields.len()
            && declared
                .inputs
                .iter()
                .zip(&descriptor.fields)
                .all(|(param, field)| param.indexed == field.indexed);
        if !layout_matches {
            let expected_indexed = declared.inputs.iter().filter(|p| p.indexed).count();
            let indexed = descriptor.indexed_fields().len();
            return Err(SchemaError::LayoutMismatch {
                name: descriptor.name.clone(),
                expected_indexed,
                expected_data: declared.inputs.len() - expected_indexed,
                indexed,
                data: descriptor.fields.len() - indexed,
            });
        }
        Ok(())
    }
}

//! `EvmDecoder`: strict decoding of EVM logs against an event descriptor.

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{B256, U256};
use carbonwatch_core::{
    descriptor::{EventDescriptor, FieldDef, FieldType},
    error::DecodeError,
    event::{DecodedEvent, RawLogRecord},
    types::FieldValue,
};
use indexmap::IndexMap;

use crate::normalizer;

const WORD: usize = 32;

/// The EVM log decoder.
/// Thread-safe, cheap to clone (no heap state).
#[derive(Debug, Default, Clone)]
pub struct EvmDecoder;

impl EvmDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode `raw` using `descriptor`.
    ///
    /// The caller is expected to have matched topics[0] against the
    /// descriptor's signature hash. Decoding is deterministic: the same record
    /// and descriptor always yield an identical [`DecodedEvent`].
    pub fn decode(
        &self,
        raw: &RawLogRecord,
        descriptor: &EventDescriptor,
    ) -> Result<DecodedEvent, DecodeError> {
        if raw.topics.is_empty() {
            return Err(DecodeError::MissingSignature);
        }

        let indexed = descriptor.indexed_fields();
        let expected_topics = indexed.len() + 1;
        if raw.topics.len() != expected_topics {
            return Err(DecodeError::TopicCount {
                event: descriptor.name.clone(),
                expected: expected_topics,
                got: raw.topics.len(),
            });
        }

        // Indexed fields → topics[1..]
        let mut decoded: IndexMap<&str, FieldValue> = IndexMap::new();
        for (field, topic) in indexed.iter().zip(&raw.topics[1..]) {
            decoded.insert(field.name.as_str(), self.decode_topic(topic, field)?);
        }

        // Non-indexed fields → data payload
        let data_fields = descriptor.data_fields();
        for (field, value) in data_fields.iter().zip(self.decode_data(&raw.data, &data_fields)?) {
            decoded.insert(field.name.as_str(), value);
        }

        // Re-emit in declaration order, not topic/data order
        let mut fields = IndexMap::with_capacity(descriptor.fields.len());
        for field in &descriptor.fields {
            let value = decoded.swap_remove(field.name.as_str()).ok_or_else(|| {
                DecodeError::AbiDecodeFailed { reason: format!("field '{}' missing", field.name) }
            })?;
            fields.insert(field.name.clone(), value);
        }

        Ok(DecodedEvent {
            kind: descriptor.name.clone(),
            fields,
            transaction_hash: raw.transaction_hash,
            block_number: raw.block_number,
            log_index: raw.log_index,
            address: raw.address,
        })
    }

    /// Decode a single indexed topic (always 32 bytes, ABI-encoded).
    ///
    /// Reference types (`string`, `bytes`) are stored as the keccak256 of
    /// their value in indexed position; the value itself is unrecoverable and
    /// the hash is returned instead.
    fn decode_topic(&self, topic: &B256, field: &FieldDef) -> Result<FieldValue, DecodeError> {
        if field.ty.is_reference() {
            return Ok(FieldValue::Hash(*topic));
        }
        check_word(field, topic.as_slice())?;

        let dyn_type = normalizer::to_dyn_type(&field.ty);
        let value = dyn_type
            .abi_decode(topic.as_slice())
            .map_err(|e| DecodeError::AbiDecodeFailed {
                reason: format!("topic '{}': {e}", field.name),
            })?;
        normalizer::normalize(value, field)
    }

    /// Decode the data payload (non-indexed params) as an ABI-encoded tuple.
    fn decode_data(
        &self,
        data: &[u8],
        fields: &[&FieldDef],
    ) -> Result<Vec<FieldValue>, DecodeError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        // Every supported type occupies exactly one head word
        let head_len = fields.len() * WORD;
        if data.len() < head_len {
            return Err(DecodeError::AbiDecodeFailed {
                reason: format!(
                    "data is {} bytes, {} fields need at least {head_len}",
                    data.len(),
                    fields.len()
                ),
            });
        }
        for (i, field) in fields.iter().enumerate() {
            if !field.ty.is_reference() {
                check_word(field, &data[i * WORD..(i + 1) * WORD])?;
            }
        }

        let tuple_type =
            DynSolType::Tuple(fields.iter().map(|f| normalizer::to_dyn_type(&f.ty)).collect());
        let decoded = tuple_type
            .abi_decode_params(data)
            .map_err(|e| DecodeError::AbiDecodeFailed { reason: e.to_string() })?;

        let values = match decoded {
            DynSolValue::Tuple(vals) => vals,
            other => vec![other],
        };
        if values.len() != fields.len() {
            return Err(DecodeError::AbiDecodeFailed {
                reason: format!("decoded {} values for {} fields", values.len(), fields.len()),
            });
        }

        fields
            .iter()
            .zip(values)
            .map(|(field, value)| normalizer::normalize(value, field))
            .collect()
    }
}

/// Check that a 32-byte word holds a value that fits `field`'s declared type.
///
/// - `uintN`: bits above N are zero
/// - `intN`: bits above N-1 are a sign extension
/// - `address`: upper 12 bytes are zero
/// - `bool`: 0 or 1
/// - `bytesN`: bytes after N are zero
pub fn check_word(field: &FieldDef, word: &[u8]) -> Result<(), DecodeError> {
    let value = U256::from_be_slice(word);
    let fits = match field.ty {
        FieldType::Uint(bits) => bits == 256 || (value >> bits as usize).is_zero(),
        FieldType::Int(bits) => {
            if bits == 256 {
                true
            } else {
                let high = value >> (bits as usize - 1);
                high.is_zero() || high == U256::MAX >> (bits as usize - 1)
            }
        }
        FieldType::Bool => value <= U256::from(1u8),
        FieldType::Address => word[..12].iter().all(|b| *b == 0),
        FieldType::FixedBytes(n) => word[n as usize..].iter().all(|b| *b == 0),
        FieldType::Bytes | FieldType::String => true,
    };
    if fits {
        Ok(())
    } else {
        Err(DecodeError::Overflow { field: field.name.clone(), ty: field.ty.to_string() })
    }
}

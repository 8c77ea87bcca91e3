//! Converts alloy-core `DynSolValue` → CarbonWatch `FieldValue`, and
//! `FieldType` → alloy `DynSolType`.

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use carbonwatch_core::{
    descriptor::{FieldDef, FieldType},
    error::DecodeError,
    types::{FieldValue, TokenAmount},
};

/// Build the alloy `DynSolType` for a descriptor field type.
pub fn to_dyn_type(ty: &FieldType) -> DynSolType {
    match ty {
        FieldType::Uint(bits) => DynSolType::Uint(*bits as usize),
        FieldType::Int(bits) => DynSolType::Int(*bits as usize),
        FieldType::Bool => DynSolType::Bool,
        FieldType::Address => DynSolType::Address,
        FieldType::FixedBytes(n) => DynSolType::FixedBytes(*n as usize),
        FieldType::Bytes => DynSolType::Bytes,
        FieldType::String => DynSolType::String,
    }
}

/// Convert a decoded value into the typed value for `field`.
///
/// Unsigned fields with a declared precision become [`FieldValue::Amount`].
pub fn normalize(val: DynSolValue, field: &FieldDef) -> Result<FieldValue, DecodeError> {
    let value = match val {
        DynSolValue::Bool(b) => FieldValue::Bool(b),
        DynSolValue::Int(i, _) => FieldValue::Int(i),
        DynSolValue::Uint(u, _) => match field.decimals {
            Some(decimals) => FieldValue::Amount(TokenAmount::new(u, decimals)),
            None => FieldValue::Uint(u),
        },
        DynSolValue::FixedBytes(word, size) => FieldValue::FixedBytes(word.0[..size].to_vec()),
        DynSolValue::Bytes(b) => FieldValue::Bytes(b),
        DynSolValue::String(s) => FieldValue::Str(s),
        DynSolValue::Address(a) => FieldValue::Address(a),
        other => {
            return Err(DecodeError::AbiDecodeFailed {
                reason: format!("field '{}': unexpected value {other:?}", field.name),
            });
        }
    };
    Ok(value)
}

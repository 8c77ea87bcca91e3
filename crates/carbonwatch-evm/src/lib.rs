//! # carbonwatch-evm
//!
//! EVM log decoding for CarbonWatch.
//!
//! ## Implementation notes
//! - Uses `alloy-core` dyn-abi for ABI decode
//! - Topics[0] → event signature hash (keccak256)
//! - Topics[1..] → indexed parameters (each 32 bytes, ABI-encoded)
//! - `data` → non-indexed parameters (ABI-encoded tuple)
//! - Every 32-byte word is checked against its declared width before decode,
//!   so a value that does not fit its type is rejected instead of truncated

pub mod decoder;
pub mod fingerprint;
pub mod interface;
pub mod normalizer;

pub use decoder::EvmDecoder;
pub use fingerprint::{keccak256_signature, topic_hash};
pub use interface::ContractInterface;

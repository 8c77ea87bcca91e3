//! EVM event signature hashing.
//!
//! The first topic of a non-anonymous EVM log is the keccak256 hash of the
//! event's canonical signature, e.g.:
//!   keccak256("CreditsIssued(address,uint256)")
//!   → 0xba27001eed39081e9d6f521103bc201676a9b4eb7fe868e5e596da78b135126b

use alloy_primitives::B256;
use carbonwatch_core::descriptor::EventDescriptor;
use tiny_keccak::{Hasher, Keccak};

/// Compute the keccak256 hash of an event signature string.
/// Input: `"EventName(type1,type2,...)"`, the canonical ABI signature.
pub fn keccak256_signature(signature: &str) -> B256 {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    B256::from(output)
}

/// The topics[0] value logs of `descriptor` carry.
pub fn topic_hash(descriptor: &EventDescriptor) -> B256 {
    keccak256_signature(&descriptor.signature())
}

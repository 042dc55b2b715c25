//! Two-party payment channels: off-chain signed states, an authoritative
//! custody ledger and a bounded challenge window for unilateral closes.

mod abiencode {
    mod de;
    mod error;
    mod hashing;
    mod ser;

    pub mod types;

    pub use de::{from_slice, Decode, SlotReader};
    pub use error::{Error, Result};
    pub use hashing::{hash_bytes, to_hash, Keccak256Writer};
    pub use ser::{slots_for, to_vec, to_writer, Encode, SlotWriter, Writer, SLOT_SIZE};

    #[cfg(test)]
    pub mod tests;
}
pub mod sig;

pub mod adjudicator;
pub mod channel;
mod client;
pub mod config;
pub mod ledger;
pub mod messages;
pub mod scheduler;
pub mod session;
pub mod wire;

pub use abiencode::types::{Address, Bytes32, Hash, InvalidLength, Signature, U256};
pub use abiencode::Error as CodecError;
pub use client::TipClient;

/// Canonical encoding of channel objects, shared by signers and verifiers.
pub mod codec {
    pub use crate::abiencode::{from_slice, hash_bytes, to_hash, to_vec, Decode, Encode};
}

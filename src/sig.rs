//! Handles the creation and verification of (Ethereum) Signatures.
//!
//! States are signed over the Keccak-256 hash of their canonical encoding,
//! wrapped in the `\x19Ethereum Signed Message:\n32` prefix. Signatures are
//! 65 bytes `r || s || v` with `v ∈ {27, 28}`, so a custody contract can
//! check them with `ecrecover`.

use crate::abiencode::{
    hash_bytes,
    types::{Address, Hash, Signature},
};
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[cfg(not(any(feature = "k256", feature = "secp256k1")))]
compile_error!("enable at least one signature backend: `k256` or `secp256k1`");

#[cfg(feature = "k256")]
pub(crate) mod k256;
#[cfg(feature = "secp256k1")]
pub(crate) mod secp256k1;

// secp256k1 (libsecp256k1 bindings) takes precedence if it is enabled, k256
// is the pure Rust default.
#[cfg(feature = "secp256k1")]
pub use self::secp256k1::{recover_signer, Signer};
#[cfg(all(feature = "k256", not(feature = "secp256k1")))]
pub use self::k256::{recover_signer, Signer};


/// Errors from key handling and signature recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("invalid recovery id {0}, expected 27 or 28")]
    InvalidRecoveryId(u8),
    #[error("malformed signature")]
    MalformedSignature,
    #[error("public key recovery failed")]
    RecoveryFailed,
    #[error("signing failed")]
    SigningFailed,
}

/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the slot writer
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}

/// Ethereum address of an uncompressed SEC1 public key (`0x04 || x || y`).
fn address_from_uncompressed(pk: &[u8]) -> Address {
    // Throw away the first byte, which is not part of the public key. It is
    // the SEC1 tag for the uncompressed encoding.
    let hash: [u8; 32] = Keccak256::digest(&pk[1..]).into();

    let mut addr = Address([0; 20]);
    addr.0.copy_from_slice(&hash[32 - 20..]);
    addr
}

/// Splits `v` back into the raw recovery id used by the ECDSA libraries.
fn recovery_id(sig: &Signature) -> Result<u8, Error> {
    match sig.0[64] {
        v @ (27 | 28) => Ok(v - 27),
        v => Err(Error::InvalidRecoveryId(v)),
    }
}

/// Signs an already encoded message (usually a channel state).
pub fn sign(encoding: &[u8], signer: &Signer) -> Result<Signature, Error> {
    signer.sign_eth(hash_bytes(encoding))
}

/// Checks that `signature` over `encoding` was made by `expected_signer`.
///
/// Never fails: malformed signatures, bad recovery ids or a different signer
/// all return `false`.
pub fn verify(encoding: &[u8], signature: &Signature, expected_signer: Address) -> bool {
    match recover_signer(hash_bytes(encoding), *signature) {
        Ok(addr) => addr == expected_signer,
        Err(_) => false,
    }
}

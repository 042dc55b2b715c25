//! Signer using libsecp256k1 through the `secp256k1` crate.

use super::{address_from_uncompressed, hash_to_eth_signed_msg_hash, recovery_id, Error};
use crate::abiencode::types::{Address, Hash, Signature};
use ::secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};

pub struct Signer {
    secp: Secp256k1<All>,
    key: SecretKey,
    addr: Address,
}

impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

impl From<PublicKey> for Address {
    fn from(pk: PublicKey) -> Self {
        address_from_uncompressed(&pk.serialize_uncompressed())
    }
}

impl Signer {
    pub fn new<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        let secp = Secp256k1::new();
        let key = SecretKey::new(rng);
        let addr = PublicKey::from_secret_key(&secp, &key).into();
        Self { secp, key, addr }
    }

    /// Creates a signer from a raw 32 byte secret key.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, Error> {
        let secp = Secp256k1::new();
        let key = SecretKey::from_slice(secret).map_err(|_| Error::InvalidSecretKey)?;
        let addr = PublicKey::from_secret_key(&secp, &key).into();
        Ok(Self { secp, key, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    /// Sign a hash using a Ethereum 65-byte recoverable signature.
    ///
    /// Note that this differs from transaction signatures, as it does not
    /// include the chain id (EIP-155).
    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);
        let msg = Message::from_slice(&hash.0).map_err(|_| Error::SigningFailed)?;

        // sign_ecdsa_recoverable gives us the additional information needed
        // for v, so the contract can recover the address.
        let sig = self.secp.sign_ecdsa_recoverable(&msg, &self.key);
        let (v, rs) = sig.serialize_compact();

        // EIP-2 makes signatures with a high s invalid. libsecp256k1 already
        // produces low-s signatures, this just fails early if that changes.
        debug_assert!(rs[32] & 0x80 == 0);

        // yParity is offset by 27, as the EVM expects.
        let v: u8 = 27 + v.to_i32() as u8;

        Ok(Signature::new(&rs, v))
    }

    pub fn recover_signer(&self, msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
        recover_signer(msg, eth_sig)
    }
}

/// Recover the address that signed `msg`.
///
/// `msg` is the hash given to [Signer::sign_eth()], it must not include the
/// `Ethereum Signed Message` prefix.
pub fn recover_signer(msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
    let secp = Secp256k1::verification_only();
    let hash = hash_to_eth_signed_msg_hash(msg);
    let msg = Message::from_slice(&hash.0).map_err(|_| Error::RecoveryFailed)?;

    let recid = RecoveryId::from_i32(recovery_id(&eth_sig)?.into())
        .map_err(|_| Error::MalformedSignature)?;
    let sig = RecoverableSignature::from_compact(&eth_sig.0[..64], recid)
        .map_err(|_| Error::MalformedSignature)?;

    let pk = secp
        .recover_ecdsa(&msg, &sig)
        .map_err(|_| Error::RecoveryFailed)?;

    Ok(pk.into())
}

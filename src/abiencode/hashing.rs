use super::{to_writer, types::Hash, Encode, Writer};

use sha3::{Digest, Keccak256};

#[derive(Default)]
pub struct Keccak256Writer {
    hasher: Keccak256,
}

impl Writer for Keccak256Writer {
    fn write(&mut self, slot: &[u8]) {
        self.hasher.update(slot);
    }
}

impl Keccak256Writer {
    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

/// Keccak-256 of the canonical encoding of `value`.
pub fn to_hash<T>(value: &T) -> Hash
where
    T: Encode,
{
    let mut writer = Keccak256Writer::default();
    to_writer(value, &mut writer);
    writer.finalize()
}

/// Keccak-256 of bytes that are already encoded.
pub fn hash_bytes(encoding: &[u8]) -> Hash {
    Hash(Keccak256::digest(encoding).into())
}

use super::types::{Address, Bytes32, Hash, U256};

/// Every value is written in 32 byte slots, like the EVM does.
pub const SLOT_SIZE: usize = 32; // bytes

/// Number of slots needed to hold `len` bytes of dynamic data.
pub const fn slots_for(len: usize) -> usize {
    (len + SLOT_SIZE - 1) / SLOT_SIZE
}

/// Sink for encoded slots. Hashing and buffering both implement it, so
/// hashing never needs the full encoding in memory.
pub trait Writer {
    fn write(&mut self, slot: &[u8]);
}

impl Writer for Vec<u8> {
    fn write(&mut self, slot: &[u8]) {
        self.extend_from_slice(slot);
    }
}

/// Types with a fixed canonical slot layout.
///
/// Implementations must write the same bytes for equal values on every
/// platform. Field order, widths and alignment are part of the protocol: the
/// signer and every verifier encode through the same impl.
pub trait Encode {
    fn encode_to<W: Writer>(&self, w: &mut SlotWriter<'_, W>);
}

/// Writes values into a [Writer], one padded slot at a time.
pub struct SlotWriter<'a, W: Writer> {
    writer: &'a mut W,
}

impl<'a, W: Writer> SlotWriter<'a, W> {
    pub fn new(writer: &'a mut W) -> Self {
        Self { writer }
    }

    // Panics if N>SLOT_SIZE
    fn write_right_aligned<const N: usize>(&mut self, v: [u8; N]) {
        let mut bytes = [0u8; SLOT_SIZE];
        bytes[SLOT_SIZE - N..].copy_from_slice(v.as_slice());
        self.writer.write(bytes.as_slice())
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_right_aligned(v.to_be_bytes())
    }

    pub fn write_usize(&mut self, v: usize) {
        self.write_right_aligned((v as u64).to_be_bytes())
    }

    pub fn write_u256(&mut self, v: U256) {
        let mut bytes = [0u8; SLOT_SIZE];
        v.to_big_endian(&mut bytes);
        self.writer.write(bytes.as_slice())
    }

    pub fn write_bytes32(&mut self, v: &Bytes32) {
        self.writer.write(v.0.as_slice())
    }

    pub fn write_hash(&mut self, v: &Hash) {
        self.writer.write(v.0.as_slice())
    }

    /// Addresses are right aligned (like uints) instead of left aligned like
    /// bytesN, matching `abi.encode`.
    pub fn write_address(&mut self, v: &Address) {
        self.write_right_aligned(v.0)
    }

    /// Writes the tail part of a `bytes` value: the length slot followed by
    /// the data, zero padded to a multiple of [SLOT_SIZE]. The head offset
    /// pointing here has to be written by the caller.
    pub fn write_dyn_bytes(&mut self, v: &[u8]) {
        self.write_usize(v.len());
        for chunk in v.chunks(SLOT_SIZE) {
            let mut bytes = [0u8; SLOT_SIZE];
            bytes[..chunk.len()].copy_from_slice(chunk);
            self.writer.write(bytes.as_slice());
        }
    }
}

pub fn to_writer<T, W>(value: &T, writer: &mut W)
where
    T: Encode,
    W: Writer,
{
    value.encode_to(&mut SlotWriter::new(writer))
}

pub fn to_vec<T: Encode>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    to_writer(value, &mut buf);
    buf
}

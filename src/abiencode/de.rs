use super::{
    error::{Error, Result},
    ser::SLOT_SIZE,
    types::{Address, Bytes32, Hash, U256},
};

/// Types that can be read back from their canonical layout.
///
/// Decoding is strict: a value is only accepted if re-encoding it yields the
/// exact input bytes.
pub trait Decode: Sized {
    fn decode_from(r: &mut SlotReader<'_>) -> Result<Self>;
}

/// Reads 32 byte slots from a buffer, checking padding on the way.
pub struct SlotReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SlotReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Position in bytes from the start of the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn slot_index(&self) -> usize {
        self.pos / SLOT_SIZE
    }

    fn next_slot(&mut self) -> Result<&'a [u8; SLOT_SIZE]> {
        let end = self.pos + SLOT_SIZE;
        if end > self.buf.len() {
            return Err(Error::Truncated {
                needed: end,
                available: self.buf.len(),
            });
        }
        let buf: &'a [u8] = self.buf;
        let slot: &'a [u8; SLOT_SIZE] =
            buf[self.pos..end]
                .try_into()
                .map_err(|_| Error::Truncated {
                    needed: end,
                    available: buf.len(),
                })?;
        self.pos = end;
        Ok(slot)
    }

    fn read_right_aligned<const N: usize>(&mut self) -> Result<[u8; N]> {
        let index = self.slot_index();
        let slot = self.next_slot()?;
        if slot[..SLOT_SIZE - N].iter().any(|b| *b != 0) {
            return Err(Error::NonZeroPadding(index));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&slot[SLOT_SIZE - N..]);
        Ok(out)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_right_aligned()?))
    }

    pub fn read_usize(&mut self) -> Result<usize> {
        let index = self.slot_index();
        let v = self.read_u64()?;
        usize::try_from(v).map_err(|_| Error::NonZeroPadding(index))
    }

    pub fn read_u256(&mut self) -> Result<U256> {
        Ok(U256::from_big_endian(self.next_slot()?))
    }

    pub fn read_bytes32(&mut self) -> Result<Bytes32> {
        Ok(Bytes32(*self.next_slot()?))
    }

    pub fn read_hash(&mut self) -> Result<Hash> {
        Ok(Hash(*self.next_slot()?))
    }

    pub fn read_address(&mut self) -> Result<Address> {
        Ok(Address(self.read_right_aligned()?))
    }

    /// Reads a head offset and checks that it equals `expected`.
    pub fn expect_offset(&mut self, expected: usize) -> Result<()> {
        let got = self.read_usize()?;
        if got != expected {
            return Err(Error::InvalidOffset { expected, got });
        }
        Ok(())
    }

    /// Reads the tail of a `bytes` value (length + padded data), rejecting
    /// anything longer than `max_len` before touching the data.
    pub fn read_dyn_bytes(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let len = self.read_usize()?;
        if len > max_len {
            return Err(Error::TooLarge(len));
        }
        let mut out = Vec::with_capacity(len);
        let mut left = len;
        while left > 0 {
            let index = self.slot_index();
            let slot = self.next_slot()?;
            let take = left.min(SLOT_SIZE);
            if slot[take..].iter().any(|b| *b != 0) {
                return Err(Error::NonZeroPadding(index));
            }
            out.extend_from_slice(&slot[..take]);
            left -= take;
        }
        Ok(out)
    }

    /// Fails unless the whole input was consumed.
    pub fn finish(self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }
}

/// Decodes a complete value, rejecting trailing bytes.
pub fn from_slice<T: Decode>(buf: &[u8]) -> Result<T> {
    let mut reader = SlotReader::new(buf);
    let value = T::decode_from(&mut reader)?;
    reader.finish()?;
    Ok(value)
}

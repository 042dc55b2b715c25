use super::*;
use core::fmt::Debug;
use hex::FromHex;

use super::types::{Address, Hash};

/*
Python code to split a long hex string into chunks of 32 bytes, the
annotations in the expected strings are done manually.
```python
s = "..."
print(*(s[i:i+64] for i in range(0, len(s), 64)), sep="\n")
```
*/

struct AssertWriter<'a, I>
where
    I: Iterator<Item = &'a str>,
{
    expected_iter: I,
}

struct Slot<'a>(&'a [u8]);

impl<'a> Debug for Slot<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in self.0 {
            f.write_fmt(format_args!("{:02x}", b))?;
        }
        Ok(())
    }
}

impl<'a> PartialEq for Slot<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<'a, I> Writer for AssertWriter<'a, I>
where
    I: Iterator<Item = &'a str>,
{
    fn write(&mut self, slot: &[u8]) {
        match self.expected_iter.next() {
            Some(expected) => {
                // Make sure the test expects something that makes sense
                assert_eq!(
                    expected.len(),
                    64,
                    "The expected input must be grouped into slots of 32 bytes as hex, without 0x."
                );
                assert_eq!(slot.len(), 32, "Each slot should have 32 bytes.");

                let expected = <[u8; 32]>::from_hex(expected).unwrap();

                // Wrapping both in Slot makes assert_eq! print them as hex.
                assert_eq!(
                    Slot(slot),
                    Slot(expected.as_slice()),
                    "slot did not match the expected value"
                );
            }
            None => {
                panic!("Expected end of data, got {:?}", Slot(slot));
            }
        }
    }
}

/// Strips whitespace and `// comments` from the expected layout.
fn expected_slots(expected: &str) -> impl Iterator<Item = &str> {
    expected
        .lines()
        .map(|l| l.split("//").next().unwrap_or("").trim())
        .filter(|l| !l.is_empty())
}

/// Encodes `value` and compares it slot by slot against `expected`.
pub fn encode_and_compare<T: Encode>(value: &T, expected: &str) {
    let mut writer = AssertWriter {
        expected_iter: expected_slots(expected),
    };
    to_writer(value, &mut writer);
    assert!(
        writer.expected_iter.next().is_none(),
        "encoding ended before all expected slots were written"
    );
}

/// Decodes the hex layout in `expected` into raw bytes.
pub fn slots_to_bytes(expected: &str) -> Vec<u8> {
    expected_slots(expected)
        .flat_map(|s| <[u8; 32]>::from_hex(s).unwrap())
        .collect()
}

struct Pair {
    a: Address,
    n: u64,
    data: Vec<u8>,
}

impl Encode for Pair {
    fn encode_to<W: Writer>(&self, w: &mut SlotWriter<'_, W>) {
        w.write_address(&self.a);
        w.write_u64(self.n);
        w.write_usize(3 * 32);
        w.write_dyn_bytes(&self.data);
    }
}

impl Decode for Pair {
    fn decode_from(r: &mut SlotReader<'_>) -> Result<Self> {
        let a = r.read_address()?;
        let n = r.read_u64()?;
        r.expect_offset(3 * 32)?;
        let data = r.read_dyn_bytes(64)?;
        Ok(Pair { a, n, data })
    }
}

const PAIR: &str = "
    0000000000000000000000005b38da6a701c568545dcfcb03fcb875f56beddc4 // a
    0000000000000000000000000000000000000000000000000000000000002222 // n
    0000000000000000000000000000000000000000000000000000000000000060 // offset data
    0000000000000000000000000000000000000000000000000000000000000021 // len data
    a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1 // data
    a200000000000000000000000000000000000000000000000000000000000000 // data (padded)
";

fn pair() -> Pair {
    let mut data = vec![0xa1; 32];
    data.push(0xa2);
    Pair {
        a: "5B38Da6a701c568545dCfcB03FcB875f56beddC4".parse().unwrap(),
        n: 0x2222,
        data,
    }
}

#[test]
fn layout_static_and_dynamic() {
    encode_and_compare(&pair(), PAIR);
}

#[test]
fn decode_accepts_canonical_layout() {
    let decoded: Pair = from_slice(&slots_to_bytes(PAIR)).unwrap();
    let expected = pair();
    assert_eq!(decoded.a, expected.a);
    assert_eq!(decoded.n, expected.n);
    assert_eq!(decoded.data, expected.data);
}

#[test]
fn decode_rejects_truncated_input() {
    let bytes = slots_to_bytes(PAIR);
    for cut in [0, 1, 31, 32, 100, bytes.len() - 1] {
        let res = from_slice::<Pair>(&bytes[..cut]);
        assert!(
            matches!(res, Err(Error::Truncated { .. })),
            "cut at {cut}: {:?}",
            res.err()
        );
    }
}

#[test]
fn decode_rejects_trailing_bytes() {
    let mut bytes = slots_to_bytes(PAIR);
    bytes.push(0);
    assert_eq!(
        from_slice::<Pair>(&bytes).err(),
        Some(Error::TrailingBytes(1))
    );
}

#[test]
fn decode_rejects_dirty_padding() {
    // Address padding
    let mut bytes = slots_to_bytes(PAIR);
    bytes[0] = 1;
    assert_eq!(from_slice::<Pair>(&bytes).err(), Some(Error::NonZeroPadding(0)));

    // Padding after the dynamic data
    let mut bytes = slots_to_bytes(PAIR);
    let last = bytes.len() - 1;
    bytes[last] = 1;
    assert_eq!(from_slice::<Pair>(&bytes).err(), Some(Error::NonZeroPadding(5)));
}

#[test]
fn decode_rejects_wrong_offset() {
    let mut bytes = slots_to_bytes(PAIR);
    bytes[2 * 32 + 31] = 0x40;
    assert_eq!(
        from_slice::<Pair>(&bytes).err(),
        Some(Error::InvalidOffset {
            expected: 0x60,
            got: 0x40
        })
    );
}

#[test]
fn decode_rejects_oversized_length_before_reading_data() {
    let mut bytes = slots_to_bytes(PAIR);
    bytes[3 * 32 + 31] = 0xff;
    assert_eq!(from_slice::<Pair>(&bytes).err(), Some(Error::TooLarge(0xff)));
}

#[test]
fn keccak_of_empty_input() {
    let expected = Hash(
        <[u8; 32]>::from_hex("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
            .unwrap(),
    );
    assert_eq!(hash_bytes(&[]), expected);
}

#[test]
fn streaming_hash_matches_buffered_hash() {
    let p = pair();
    assert_eq!(to_hash(&p), hash_bytes(&to_vec(&p)));
}

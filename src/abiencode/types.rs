use core::{fmt::Debug, str::FromStr};

use rand::{distributions::Standard, prelude::Distribution};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uint::construct_uint;

macro_rules! impl_hex_debug {
    ($T:ident) => {
        impl Debug for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }
    };
}

macro_rules! bytesN {
    ( $T:ident, $N:literal ) => {
        #[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                let mut bytes = [0u8; $N];
                rng.fill(&mut bytes[..]);
                $T(bytes)
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl AsRef<[u8]> for $T {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl TryFrom<&[u8]> for $T {
            type Error = InvalidLength;

            fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
                Ok($T(value.try_into().map_err(|_| InvalidLength {
                    expected: $N,
                    got: value.len(),
                })?))
            }
        }

        impl FromStr for $T {
            type Err = InvalidLength;

            /// Parses `0x`-prefixed or bare hex.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s).map_err(|_| InvalidLength {
                    expected: $N,
                    got: s.len() / 2,
                })?;
                bytes.as_slice().try_into()
            }
        }

        impl Serialize for $T {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.collect_str(&format_args!("{:?}", self))
            }
        }

        impl<'de> Deserialize<'de> for $T {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }

        impl_hex_debug!($T);
    };
}

/// Returned when a byte slice cannot be converted into a fixed-size type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} bytes, got {got}")]
pub struct InvalidLength {
    pub expected: usize,
    pub got: usize,
}

bytesN!(Bytes32, 32);
bytesN!(Hash, 32);
bytesN!(Signature, 65);
bytesN!(Address, 20);

impl Signature {
    pub fn new(rs: &[u8; 64], v: u8) -> Self {
        let mut sig: Signature = Signature([0; 65]);
        sig.0[..64].copy_from_slice(rs);
        sig.0[64] = v;
        sig
    }
}

// Amounts and balances. We could use primitive_types::U256, but that only
// adds a hex-string serde representation we don't want in config files.
construct_uint! {
    pub struct U256(4);
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let buf: [u8; 32] = rng.gen();
        U256::from_big_endian(&buf)
    }
}

/// Amounts are written as decimal strings, so values above `u64::MAX` survive
/// TOML (whose integers are `i64`).
impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct U256Visitor;

        impl<'de> de::Visitor<'de> for U256Visitor {
            type Value = U256;

            fn expecting(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                f.write_str("a non-negative integer or a decimal/0x-hex string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<U256, E> {
                Ok(U256::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<U256, E> {
                u64::try_from(v)
                    .map(U256::from)
                    .map_err(|_| E::custom("amount must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<U256, E> {
                match v.strip_prefix("0x") {
                    Some(hex) => U256::from_str_radix(hex, 16).map_err(E::custom),
                    None => U256::from_dec_str(v).map_err(E::custom),
                }
            }
        }

        deserializer.deserialize_any(U256Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_from_hex_with_and_without_prefix() {
        let a: Address = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf".parse().unwrap();
        let b: Address = "7e5f4552091a69125d5dfcb7b8c2659029395bdf".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(
            format!("{:?}", a),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = "0x7e5f45".parse::<Address>().unwrap_err();
        assert_eq!(err.expected, 20);
    }

    #[test]
    fn u256_deserializes_from_integer_and_strings() {
        #[derive(Deserialize)]
        struct Amounts {
            a: U256,
            b: U256,
            c: U256,
        }
        let amounts: Amounts = toml::from_str(
            r#"
            a = 10
            b = "340282366920938463463374607431768211456"
            c = "0xff"
            "#,
        )
        .unwrap();
        assert_eq!(amounts.a, U256::from(10));
        assert_eq!(amounts.b, U256::from(u128::MAX) + U256::one());
        assert_eq!(amounts.c, U256::from(255));
    }

    #[test]
    fn u256_rejects_negative() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Amount {
            a: U256,
        }
        assert!(toml::from_str::<Amount>("a = -1").is_err());
    }
}

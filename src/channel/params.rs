use serde::{Deserialize, Serialize};

use super::{PartIdx, PARTICIPANTS};
use crate::abiencode::{
    self,
    types::{Address, Bytes32, Hash},
    Encode, SlotWriter, Writer,
};

/// Constant parameters of a channel, fixed when it is opened.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub party_a: Address,
    pub party_b: Address,
    /// The fungible token held in custody.
    pub asset: Address,
    /// Separates independent channels between the same pair and asset.
    pub salt: Bytes32,
}

/// What the channel id commits to: participants in sorted order, so the id
/// does not depend on who is called A.
struct ChannelIdPreimage<'a> {
    lo: &'a Address,
    hi: &'a Address,
    asset: &'a Address,
    salt: &'a Bytes32,
}

impl<'a> Encode for ChannelIdPreimage<'a> {
    fn encode_to<W: Writer>(&self, w: &mut SlotWriter<'_, W>) {
        w.write_address(self.lo);
        w.write_address(self.hi);
        w.write_address(self.asset);
        w.write_bytes32(self.salt);
    }
}

/// Deterministic channel id: `keccak256(abi.encode(min(a,b), max(a,b), asset, salt))`.
pub fn channel_id(a: Address, b: Address, asset: Address, salt: Bytes32) -> Hash {
    let (lo, hi) = if a <= b { (&a, &b) } else { (&b, &a) };
    abiencode::to_hash(&ChannelIdPreimage {
        lo,
        hi,
        asset: &asset,
        salt: &salt,
    })
}

impl ChannelParams {
    pub fn channel_id(&self) -> Hash {
        channel_id(self.party_a, self.party_b, self.asset, self.salt)
    }

    pub fn participants(&self) -> [Address; PARTICIPANTS] {
        [self.party_a, self.party_b]
    }

    pub fn participant(&self, idx: PartIdx) -> Address {
        self.participants()[idx]
    }

    pub fn index_of(&self, addr: Address) -> Option<PartIdx> {
        self.participants().iter().position(|p| *p == addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn params(rng: &mut StdRng) -> ChannelParams {
        ChannelParams {
            party_a: rng.gen(),
            party_b: rng.gen(),
            asset: rng.gen(),
            salt: rng.gen(),
        }
    }

    #[test]
    fn channel_id_ignores_participant_order() {
        let mut rng = StdRng::seed_from_u64(0);
        let p = params(&mut rng);
        let swapped = ChannelParams {
            party_a: p.party_b,
            party_b: p.party_a,
            ..p
        };
        assert_eq!(p.channel_id(), swapped.channel_id());
    }

    #[test]
    fn channel_id_depends_on_every_field() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = params(&mut rng);
        let id = p.channel_id();

        let other: Address = rng.gen();
        for changed in [
            ChannelParams { party_a: other, ..p },
            ChannelParams { party_b: other, ..p },
            ChannelParams { asset: other, ..p },
            ChannelParams {
                salt: rng.gen(),
                ..p
            },
        ] {
            assert_ne!(changed.channel_id(), id);
        }
    }

    #[test]
    fn index_of_participants() {
        let mut rng = StdRng::seed_from_u64(2);
        let p = params(&mut rng);
        assert_eq!(p.index_of(p.party_a), Some(0));
        assert_eq!(p.index_of(p.party_b), Some(1));
        assert_eq!(p.index_of(rng.gen()), None);
    }
}

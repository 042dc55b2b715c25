//! Off-chain channel states and their canonical encoding.
//!
//! The encoding defined here is the one both participants sign and the one
//! the ledger verifies against, so it must never change between the two.

use thiserror::Error;

use super::{counterparty, ChannelParams, PartIdx, PARTICIPANTS};
use crate::{
    abiencode::{
        self,
        types::{Address, Hash, Signature, U256},
        Decode, Encode, SlotReader, SlotWriter, Writer, SLOT_SIZE,
    },
    sig::{self, Signer},
};

/// Upper bound for `app_data`, e.g. a tip message hash plus some metadata.
pub const MAX_APP_DATA: usize = 1024;

/// Slots in the head: channel id, nonce, both balances and the offset of
/// `app_data`.
const HEAD_SLOTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("payer {payer} has {available}, cannot pay {requested}")]
    InsufficientBalance {
        payer: PartIdx,
        available: U256,
        requested: U256,
    },
    #[error("balance overflow")]
    Overflow,
    #[error("nonce overflow")]
    NonceOverflow,
    #[error("app data of {0} bytes exceeds the limit")]
    AppDataTooLarge(usize),
    #[error("invalid participant index {0}")]
    InvalidParticipant(PartIdx),
}

/// A transfer of `amount` from `payer` to the other participant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Delta {
    pub payer: PartIdx,
    pub amount: U256,
}

impl Delta {
    pub fn from_a(amount: U256) -> Self {
        Self { payer: 0, amount }
    }

    pub fn from_b(amount: U256) -> Self {
        Self { payer: 1, amount }
    }
}

/// A single point in the channel's payment history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    id: Hash,
    nonce: u64,
    pub balance_a: U256,
    pub balance_b: U256,
    app_data: Vec<u8>,
}

impl State {
    /// The state every channel incarnation starts from: the deposits, at the
    /// ledger's base nonce.
    pub fn initial(id: Hash, base_nonce: u64, deposit_a: U256, deposit_b: U256) -> Self {
        State {
            id,
            nonce: base_nonce,
            balance_a: deposit_a,
            balance_b: deposit_b,
            app_data: Vec::new(),
        }
    }

    pub fn channel_id(&self) -> Hash {
        self.id
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn app_data(&self) -> &[u8] {
        &self.app_data
    }

    pub fn set_app_data(&mut self, data: Vec<u8>) -> Result<(), StateError> {
        if data.len() > MAX_APP_DATA {
            return Err(StateError::AppDataTooLarge(data.len()));
        }
        self.app_data = data;
        Ok(())
    }

    pub fn balances(&self) -> [U256; PARTICIPANTS] {
        [self.balance_a, self.balance_b]
    }

    fn balance_mut(&mut self, idx: PartIdx) -> &mut U256 {
        match idx {
            0 => &mut self.balance_a,
            _ => &mut self.balance_b,
        }
    }

    /// Sum of both balances, `None` on overflow.
    pub fn total(&self) -> Option<U256> {
        self.balance_a.checked_add(self.balance_b)
    }

    /// Create a new state that will replace this state.
    ///
    /// Having id and nonce as private fields forces the caller to not write
    /// garbage to one of those fields. App data is per-update and does not
    /// carry over.
    pub fn make_next_state(&self) -> Result<Self, StateError> {
        Ok(State {
            id: self.id,
            nonce: self.nonce.checked_add(1).ok_or(StateError::NonceOverflow)?,
            balance_a: self.balance_a,
            balance_b: self.balance_b,
            app_data: Vec::new(),
        })
    }

    /// The successor of this state with `delta` applied.
    pub fn apply(&self, delta: Delta) -> Result<Self, StateError> {
        if delta.payer >= PARTICIPANTS {
            return Err(StateError::InvalidParticipant(delta.payer));
        }
        let mut next = self.make_next_state()?;
        let available = self.balances()[delta.payer];
        let payer = next.balance_mut(delta.payer);
        *payer = available
            .checked_sub(delta.amount)
            .ok_or(StateError::InsufficientBalance {
                payer: delta.payer,
                available,
                requested: delta.amount,
            })?;
        let payee = next.balance_mut(counterparty(delta.payer));
        *payee = payee
            .checked_add(delta.amount)
            .ok_or(StateError::Overflow)?;
        Ok(next)
    }

    pub fn encode(&self) -> Vec<u8> {
        abiencode::to_vec(self)
    }

    pub fn decode(buf: &[u8]) -> abiencode::Result<Self> {
        abiencode::from_slice(buf)
    }

    pub fn hash(&self) -> Hash {
        abiencode::to_hash(self)
    }

    pub fn sign(&self, signer: &Signer) -> Result<Signature, sig::Error> {
        signer.sign_eth(self.hash())
    }

    pub fn is_signed_by(&self, signature: &Signature, signer: Address) -> bool {
        sig::verify(&self.encode(), signature, signer)
    }
}

/// Same layout as Solidity's `abi.encode(state)` for
/// `struct { bytes32 id; uint64 nonce; uint256 a; uint256 b; bytes appData; }`.
impl Encode for State {
    fn encode_to<W: Writer>(&self, w: &mut SlotWriter<'_, W>) {
        // The struct is dynamic, so it is preceded by its own offset.
        w.write_usize(SLOT_SIZE);
        w.write_hash(&self.id);
        w.write_u64(self.nonce);
        w.write_u256(self.balance_a);
        w.write_u256(self.balance_b);
        w.write_usize(HEAD_SLOTS * SLOT_SIZE);
        w.write_dyn_bytes(&self.app_data);
    }
}

impl Decode for State {
    fn decode_from(r: &mut SlotReader<'_>) -> abiencode::Result<Self> {
        r.expect_offset(SLOT_SIZE)?;
        let id = r.read_hash()?;
        let nonce = r.read_u64()?;
        let balance_a = r.read_u256()?;
        let balance_b = r.read_u256()?;
        r.expect_offset(HEAD_SLOTS * SLOT_SIZE)?;
        let app_data = r.read_dyn_bytes(MAX_APP_DATA)?;
        Ok(State {
            id,
            nonce,
            balance_a,
            balance_b,
            app_data,
        })
    }
}

/// A state together with one signature per participant.
///
/// Only fully signed states are evidence: the ledger accepts nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedState {
    pub state: State,
    pub sigs: [Signature; PARTICIPANTS],
}

impl SignedState {
    /// Checks both signatures against the channel participants. Returns the
    /// index of the first participant whose signature does not verify.
    pub fn verify(&self, params: &ChannelParams) -> Result<(), PartIdx> {
        let encoding = self.state.encode();
        for (idx, signer) in params.participants().into_iter().enumerate() {
            if !sig::verify(&encoding, &self.sigs[idx], signer) {
                return Err(idx);
            }
        }
        Ok(())
    }

    pub fn nonce(&self) -> u64 {
        self.state.nonce()
    }

    pub fn channel_id(&self) -> Hash {
        self.state.channel_id()
    }
}

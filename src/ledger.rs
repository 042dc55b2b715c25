//! The custody ledger: authoritative holder of deposits and channel status.
//!
//! Sessions only see the [Ledger] trait, so tests and demos can run against
//! [InMemoryLedger] while a deployment talks to a chain.

mod clock;
mod event;
mod memory;
mod transfer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use event::LedgerEvent;
pub use memory::InMemoryLedger;
pub use transfer::{AssetTransfer, InMemoryToken, TransferError};

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::{
    abiencode::types::{Address, Bytes32, Hash, U256},
    channel::{self, ChannelParams, ChannelRecord, ChannelStatus, PartIdx, SignedState},
    config::ChannelConfig,
};

/// Every failure is a rejection of the whole call: the channel record is
/// exactly as it was before.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("signature of participant {signer} does not verify")]
    BadSignature { signer: PartIdx },
    #[error("nonce {submitted} is stale, ledger is at {recorded}")]
    StaleNonce { submitted: u64, recorded: u64 },
    #[error("channel {id:?} is {status:?}")]
    InvalidChannelState { id: Hash, status: ChannelStatus },
    #[error("deposit {deposit} is below the minimum of {minimum}")]
    BelowMinimumDeposit { deposit: U256, minimum: U256 },
    #[error("challenge window closed at {expiry}, now {now}")]
    ChallengeWindowExpired { expiry: u64, now: u64 },
    #[error("challenge window open until {expiry}, now {now}")]
    ChallengeWindowActive { expiry: u64, now: u64 },
    #[error("two different states with nonce {nonce}")]
    AdjudicationConflict { nonce: u64 },
    #[error("state belongs to channel {got:?}, not {expected:?}")]
    ChannelIdMismatch { expected: Hash, got: Hash },
    #[error("state distributes {distributed:?}, channel holds {held}")]
    BalanceMismatch {
        /// `None` if the balances overflow.
        distributed: Option<U256>,
        held: U256,
    },
    #[error("participants must be two different addresses")]
    InvalidParticipants,
    #[error("amount overflow")]
    Overflow,
    #[error("asset transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

/// Operations of the custody ledger.
///
/// Mutating calls are serialized per channel and independent across
/// channels. Every successful mutation emits one [LedgerEvent].
pub trait Ledger: Send + Sync {
    /// Constants a channel opened now would get. Readable before funding.
    fn config(&self) -> ChannelConfig;

    /// Ledger time in seconds, the clock challenge windows are measured in.
    fn now(&self) -> u64;

    fn get_channel_id(&self, a: Address, b: Address, asset: Address, salt: Bytes32) -> Hash {
        channel::channel_id(a, b, asset, salt)
    }

    /// Locks both deposits and opens the channel. Either deposit may be zero
    /// as long as each non-zero deposit and their sum reach the minimum.
    fn open(&self, params: ChannelParams, deposit_a: U256, deposit_b: U256)
        -> Result<Hash, LedgerError>;

    /// Pays out a fully signed state immediately.
    fn cooperative_close(&self, id: Hash, state: &SignedState) -> Result<(), LedgerError>;

    /// Registers a fully signed state as provisional outcome and opens the
    /// challenge window. Returns the window's expiry.
    fn start_challenge(&self, id: Hash, state: &SignedState) -> Result<u64, LedgerError>;

    /// Replaces the provisional outcome with a newer state. The expiry stays
    /// where [Ledger::start_challenge] put it.
    fn counter_challenge(&self, id: Hash, state: &SignedState) -> Result<(), LedgerError>;

    /// Pays out the provisional outcome once the window has passed. Anyone
    /// may call this.
    fn finalize_challenge(&self, id: Hash) -> Result<(), LedgerError>;

    /// Snapshot of the channel. Unknown ids yield an Uninitialized record.
    fn get_state(&self, id: Hash) -> ChannelRecord;

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent>;
}

impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    fn config(&self) -> ChannelConfig {
        (**self).config()
    }

    fn now(&self) -> u64 {
        (**self).now()
    }

    fn get_channel_id(&self, a: Address, b: Address, asset: Address, salt: Bytes32) -> Hash {
        (**self).get_channel_id(a, b, asset, salt)
    }

    fn open(
        &self,
        params: ChannelParams,
        deposit_a: U256,
        deposit_b: U256,
    ) -> Result<Hash, LedgerError> {
        (**self).open(params, deposit_a, deposit_b)
    }

    fn cooperative_close(&self, id: Hash, state: &SignedState) -> Result<(), LedgerError> {
        (**self).cooperative_close(id, state)
    }

    fn start_challenge(&self, id: Hash, state: &SignedState) -> Result<u64, LedgerError> {
        (**self).start_challenge(id, state)
    }

    fn counter_challenge(&self, id: Hash, state: &SignedState) -> Result<(), LedgerError> {
        (**self).counter_challenge(id, state)
    }

    fn finalize_challenge(&self, id: Hash) -> Result<(), LedgerError> {
        (**self).finalize_challenge(id)
    }

    fn get_state(&self, id: Hash) -> ChannelRecord {
        (**self).get_state(id)
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        (**self).subscribe()
    }
}

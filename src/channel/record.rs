use serde::{Deserialize, Serialize};

use super::{ChannelParams, SignedState};
use crate::abiencode::types::{Hash, U256};

/// Lifecycle of a channel as seen by the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelStatus {
    Uninitialized,
    Open,
    Challenged,
    Closed,
}

/// A unilateral close in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispute {
    pub submitted_state: SignedState,
    pub opened_at: u64,
    /// `opened_at + challenge_period`. Counter-submissions replace the state
    /// but never move this.
    pub expiry: u64,
}

/// The ledger's authoritative view of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub channel_id: Hash,
    /// `None` until the channel is opened for the first time.
    pub params: Option<ChannelParams>,
    pub status: ChannelStatus,
    pub deposit_a: U256,
    pub deposit_b: U256,
    /// Funds in custody for this channel. Equals `deposit_a + deposit_b`
    /// while the channel is Open or Challenged, zero once Closed.
    pub held: U256,
    /// Nonce of this incarnation's initial state. Every state signed for an
    /// earlier incarnation has a lower nonce.
    pub base_nonce: u64,
    /// Highest nonce the ledger has seen for this incarnation.
    pub recorded_nonce: u64,
    pub challenge_period: u64,
    pub min_deposit: U256,
    pub dispute: Option<Dispute>,
    pub last_finalized_state: Option<SignedState>,
}

impl ChannelRecord {
    pub fn uninitialized(channel_id: Hash) -> Self {
        ChannelRecord {
            channel_id,
            params: None,
            status: ChannelStatus::Uninitialized,
            deposit_a: U256::zero(),
            deposit_b: U256::zero(),
            held: U256::zero(),
            base_nonce: 0,
            recorded_nonce: 0,
            challenge_period: 0,
            min_deposit: U256::zero(),
            dispute: None,
            last_finalized_state: None,
        }
    }

    /// Only meaningful while the channel is Challenged.
    pub fn challenge_expiry(&self) -> Option<u64> {
        match self.status {
            ChannelStatus::Challenged => self.dispute.as_ref().map(|d| d.expiry),
            _ => None,
        }
    }

    /// `deposit_a + deposit_b`, `None` on overflow.
    pub fn total_deposits(&self) -> Option<U256> {
        self.deposit_a.checked_add(self.deposit_b)
    }
}

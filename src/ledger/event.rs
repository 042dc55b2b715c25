use crate::{
    abiencode::types::{Hash, U256},
    channel::{ChannelStatus, PARTICIPANTS},
};

/// Emitted after every successful ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Opened {
        channel_id: Hash,
        base_nonce: u64,
        deposit_a: U256,
        deposit_b: U256,
    },
    Closed {
        channel_id: Hash,
        nonce: u64,
        payout: [U256; PARTICIPANTS],
    },
    ChallengeStarted {
        channel_id: Hash,
        nonce: u64,
        expiry: u64,
    },
    CounterChallenged {
        channel_id: Hash,
        nonce: u64,
        expiry: u64,
    },
    ChallengeFinalized {
        channel_id: Hash,
        nonce: u64,
        payout: [U256; PARTICIPANTS],
    },
}

impl LedgerEvent {
    pub fn channel_id(&self) -> Hash {
        match self {
            LedgerEvent::Opened { channel_id, .. }
            | LedgerEvent::Closed { channel_id, .. }
            | LedgerEvent::ChallengeStarted { channel_id, .. }
            | LedgerEvent::CounterChallenged { channel_id, .. }
            | LedgerEvent::ChallengeFinalized { channel_id, .. } => *channel_id,
        }
    }

    /// Status of the channel right after the event.
    pub fn status(&self) -> ChannelStatus {
        match self {
            LedgerEvent::Opened { .. } => ChannelStatus::Open,
            LedgerEvent::ChallengeStarted { .. } | LedgerEvent::CounterChallenged { .. } => {
                ChannelStatus::Challenged
            }
            LedgerEvent::Closed { .. } | LedgerEvent::ChallengeFinalized { .. } => {
                ChannelStatus::Closed
            }
        }
    }

    pub fn challenge_expiry(&self) -> Option<u64> {
        match self {
            LedgerEvent::ChallengeStarted { expiry, .. }
            | LedgerEvent::CounterChallenged { expiry, .. } => Some(*expiry),
            _ => None,
        }
    }

    /// Nonce of the state the event is about. `Opened` reports the base
    /// nonce of the new incarnation.
    pub fn nonce(&self) -> u64 {
        match self {
            LedgerEvent::Opened { base_nonce, .. } => *base_nonce,
            LedgerEvent::Closed { nonce, .. }
            | LedgerEvent::ChallengeStarted { nonce, .. }
            | LedgerEvent::CounterChallenged { nonce, .. }
            | LedgerEvent::ChallengeFinalized { nonce, .. } => *nonce,
        }
    }
}

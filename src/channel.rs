//! Channel data model shared by the ledger, the adjudicator and the
//! off-chain session.

mod params;
mod record;
mod state;

pub use params::{channel_id, ChannelParams};
pub use record::{ChannelRecord, ChannelStatus, Dispute};
pub use state::{Delta, StateError, SignedState, State, MAX_APP_DATA};

/// ID (Index) of a participant in the channel.
///
/// `0` is party A (the side listed first in [ChannelParams]), `1` is party B.
pub type PartIdx = usize;

pub const PARTICIPANTS: usize = 2;

/// Index of the other participant.
pub fn counterparty(part_idx: PartIdx) -> PartIdx {
    1 - part_idx
}

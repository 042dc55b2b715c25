//! Decides which of two competing states binds the channel.
//!
//! Finality is purely nonce based: a party that always submits the newest
//! state it holds can never lose funds to an older one. Balances are never
//! looked at here.

use thiserror::Error;

use crate::{abiencode::types::Hash, channel::SignedState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdjudicationError {
    #[error("states belong to different channels ({0:?} and {1:?})")]
    ChannelMismatch(Hash, Hash),
    /// Two different states carry the same nonce. Both are fully signed, so
    /// either a key leaked or an encoder disagrees; neither may win.
    #[error("conflicting states with nonce {nonce}")]
    Conflict { nonce: u64 },
}

/// Returns the binding state of `a` and `b`.
///
/// Signatures are expected to be verified by the caller.
pub fn adjudicate<'a>(
    a: &'a SignedState,
    b: &'a SignedState,
) -> Result<&'a SignedState, AdjudicationError> {
    if a.channel_id() != b.channel_id() {
        return Err(AdjudicationError::ChannelMismatch(
            a.channel_id(),
            b.channel_id(),
        ));
    }
    match a.nonce().cmp(&b.nonce()) {
        core::cmp::Ordering::Greater => Ok(a),
        core::cmp::Ordering::Less => Ok(b),
        core::cmp::Ordering::Equal if a.state.encode() == b.state.encode() => Ok(a),
        core::cmp::Ordering::Equal => Err(AdjudicationError::Conflict { nonce: a.nonce() }),
    }
}

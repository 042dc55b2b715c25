//! Messages exchanged between the two participants of a channel.
//!
//! States travel in full with the sender's signature; replies only carry
//! what the receiver cannot already compute.

use crate::{
    abiencode::types::{Hash, Signature},
    channel::{PartIdx, State},
};

/// Signature over the initial state of an incarnation. Exchanged once after
/// the channel is open on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialSignature {
    pub channel_id: Hash,
    pub nonce: u64,
    pub sig: Signature,
}

/// A proposed successor state, signed by the proposer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub state: State,
    pub actor_idx: PartIdx,
    pub sig: Signature,
}

/// The countersignature completing a [ChannelUpdate].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAccepted {
    pub channel_id: Hash,
    pub nonce: u64,
    pub sig: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRejected {
    pub channel_id: Hash,
    pub nonce: u64,
    pub reason: String,
}

/// Asks the counterparty to stop updating and settle the state with
/// `nonce`, which both already hold fully signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub channel_id: Hash,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseAccepted {
    pub channel_id: Hash,
    pub nonce: u64,
}

/// Messages sent between participants of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantMessage {
    InitialSignature(InitialSignature),
    ChannelUpdate(ChannelUpdate),
    UpdateAccepted(UpdateAccepted),
    UpdateRejected(UpdateRejected),
    CloseRequest(CloseRequest),
    CloseAccepted(CloseAccepted),
}

impl ParticipantMessage {
    pub fn channel_id(&self) -> Hash {
        match self {
            ParticipantMessage::InitialSignature(m) => m.channel_id,
            ParticipantMessage::ChannelUpdate(m) => m.state.channel_id(),
            ParticipantMessage::UpdateAccepted(m) => m.channel_id,
            ParticipantMessage::UpdateRejected(m) => m.channel_id,
            ParticipantMessage::CloseRequest(m) => m.channel_id,
            ParticipantMessage::CloseAccepted(m) => m.channel_id,
        }
    }
}

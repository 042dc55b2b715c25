use crate::{
    abiencode::types::Address,
    channel::{ChannelParams, PartIdx},
    ledger::Ledger,
    messages::ParticipantMessage,
    session::{ChannelSession, SessionError, StateStore},
    sig::Signer,
    wire::{MessageBus, SendError},
};
use std::sync::Arc;

/// The object a participant creates once: it knows how to sign and how to
/// reach the other participants, and hands out [ChannelSession]s.
///
/// Note: An application will usually have only one MessageBus type, thus
/// using dynamic dispatch here doesn't make much sense.
#[derive(Debug)]
pub struct TipClient<B: MessageBus> {
    pub(crate) bus: B,
    pub(crate) signer: Signer,
}

impl<B: MessageBus> TipClient<B> {
    pub fn new(bus: B, signer: Signer) -> Self {
        TipClient { bus, signer }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub(crate) fn send(&self, recipient: &Address, msg: ParticipantMessage) -> Result<(), SendError> {
        self.bus
            .send_to_participant(&self.signer.address(), recipient, msg)
    }

    /// Creates the local session for a channel we take part in. Our side is
    /// looked up by address.
    pub fn session<L: Ledger, S: StateStore>(
        &self,
        ledger: Arc<L>,
        store: Arc<S>,
        params: ChannelParams,
    ) -> Result<ChannelSession<'_, B, L, S>, SessionError> {
        let part_idx: PartIdx = params
            .index_of(self.address())
            .ok_or(SessionError::NotAParticipant(self.address()))?;
        Ok(ChannelSession::new(self, ledger, store, params, part_idx))
    }
}

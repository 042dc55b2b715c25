mod encoding;
mod proto;

use core::fmt::Debug;

use thiserror::Error;

pub use encoding::{decode_frame, encode_frame, ConversionError, ProtoBufEncodingLayer};

use crate::{abiencode::types::Address, messages::ParticipantMessage};

/// Delivery failed. The message may be retried, nothing was changed locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("cannot encode message: {0}")]
    Encoding(#[from] ConversionError),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Raw transport between participants, e.g. a TCP connection per peer.
pub trait BytesBus: Debug {
    fn send_to_participant(
        &self,
        sender: &Address,
        recipient: &Address,
        msg: &[u8],
    ) -> Result<(), SendError>;
}

/// Typed transport between participants.
///
/// An application will usually have only one MessageBus type, so the session
/// is generic over it instead of using dynamic dispatch.
pub trait MessageBus: Debug {
    fn send_to_participant(
        &self,
        sender: &Address,
        recipient: &Address,
        msg: ParticipantMessage,
    ) -> Result<(), SendError>;
}

use prost::{bytes::BufMut, Message};
use thiserror::Error;
use tracing::trace;

use super::{
    proto::{
        envelope, ChannelUpdateMsg, CloseAccMsg, CloseReqMsg, Envelope, InitialSignatureMsg,
        UpdateAccMsg, UpdateRejMsg,
    },
    BytesBus, MessageBus, SendError,
};
use crate::{
    abiencode::{
        self,
        types::{Address, Hash, Signature},
    },
    channel::{State, PARTICIPANTS},
    messages::{
        ChannelUpdate, CloseAccepted, CloseRequest, InitialSignature, ParticipantMessage,
        UpdateAccepted, UpdateRejected,
    },
};

/// Size of the big endian length prefix in front of every frame.
const LEN_PREFIX: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("missing field `{0}`")]
    ExpectedSome(&'static str),
    #[error("field `{field}` has {got} bytes, expected {expected}")]
    ByteLengthMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid participant index {0}")]
    InvalidParticipant(u32),
    #[error("invalid state encoding: {0}")]
    State(#[from] abiencode::Error),
    #[error("frame shorter than its length prefix")]
    Truncated,
    #[error("message of {0} bytes does not fit into a frame")]
    FrameTooLarge(usize),
    #[error("frame declares {declared} bytes but carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("malformed protobuf: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("protobuf encoding failed: {0}")]
    Encode(#[from] prost::EncodeError),
}

fn fixed<T>(field: &'static str, bytes: Vec<u8>) -> Result<T, ConversionError>
where
    T: for<'a> TryFrom<&'a [u8]>,
{
    let got = bytes.len();
    T::try_from(bytes.as_slice()).map_err(|_| ConversionError::ByteLengthMismatch {
        field,
        expected: core::mem::size_of::<T>(),
        got,
    })
}

fn hash(bytes: Vec<u8>) -> Result<Hash, ConversionError> {
    fixed("channel_id", bytes)
}

fn signature(bytes: Vec<u8>) -> Result<Signature, ConversionError> {
    fixed("sig", bytes)
}

impl From<InitialSignature> for InitialSignatureMsg {
    fn from(value: InitialSignature) -> Self {
        Self {
            channel_id: value.channel_id.0.to_vec(),
            nonce: value.nonce,
            sig: value.sig.0.to_vec(),
        }
    }
}

impl TryFrom<InitialSignatureMsg> for InitialSignature {
    type Error = ConversionError;

    fn try_from(value: InitialSignatureMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            channel_id: hash(value.channel_id)?,
            nonce: value.nonce,
            sig: signature(value.sig)?,
        })
    }
}

impl From<ChannelUpdate> for ChannelUpdateMsg {
    fn from(value: ChannelUpdate) -> Self {
        Self {
            state: value.state.encode(),
            actor_idx: value.actor_idx as u32,
            sig: value.sig.0.to_vec(),
        }
    }
}

impl TryFrom<ChannelUpdateMsg> for ChannelUpdate {
    type Error = ConversionError;

    fn try_from(value: ChannelUpdateMsg) -> Result<Self, Self::Error> {
        if value.actor_idx as usize >= PARTICIPANTS {
            return Err(ConversionError::InvalidParticipant(value.actor_idx));
        }
        Ok(Self {
            state: State::decode(&value.state)?,
            actor_idx: value.actor_idx as usize,
            sig: signature(value.sig)?,
        })
    }
}

impl From<UpdateAccepted> for UpdateAccMsg {
    fn from(value: UpdateAccepted) -> Self {
        Self {
            channel_id: value.channel_id.0.to_vec(),
            nonce: value.nonce,
            sig: value.sig.0.to_vec(),
        }
    }
}

impl TryFrom<UpdateAccMsg> for UpdateAccepted {
    type Error = ConversionError;

    fn try_from(value: UpdateAccMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            channel_id: hash(value.channel_id)?,
            nonce: value.nonce,
            sig: signature(value.sig)?,
        })
    }
}

impl From<UpdateRejected> for UpdateRejMsg {
    fn from(value: UpdateRejected) -> Self {
        Self {
            channel_id: value.channel_id.0.to_vec(),
            nonce: value.nonce,
            reason: value.reason,
        }
    }
}

impl TryFrom<UpdateRejMsg> for UpdateRejected {
    type Error = ConversionError;

    fn try_from(value: UpdateRejMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            channel_id: hash(value.channel_id)?,
            nonce: value.nonce,
            reason: value.reason,
        })
    }
}

impl From<CloseRequest> for CloseReqMsg {
    fn from(value: CloseRequest) -> Self {
        Self {
            channel_id: value.channel_id.0.to_vec(),
            nonce: value.nonce,
        }
    }
}

impl TryFrom<CloseReqMsg> for CloseRequest {
    type Error = ConversionError;

    fn try_from(value: CloseReqMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            channel_id: hash(value.channel_id)?,
            nonce: value.nonce,
        })
    }
}

impl From<CloseAccepted> for CloseAccMsg {
    fn from(value: CloseAccepted) -> Self {
        Self {
            channel_id: value.channel_id.0.to_vec(),
            nonce: value.nonce,
        }
    }
}

impl TryFrom<CloseAccMsg> for CloseAccepted {
    type Error = ConversionError;

    fn try_from(value: CloseAccMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            channel_id: hash(value.channel_id)?,
            nonce: value.nonce,
        })
    }
}

impl From<ParticipantMessage> for envelope::Msg {
    fn from(value: ParticipantMessage) -> Self {
        match value {
            ParticipantMessage::InitialSignature(m) => envelope::Msg::InitialSignature(m.into()),
            ParticipantMessage::ChannelUpdate(m) => envelope::Msg::ChannelUpdate(m.into()),
            ParticipantMessage::UpdateAccepted(m) => envelope::Msg::UpdateAccepted(m.into()),
            ParticipantMessage::UpdateRejected(m) => envelope::Msg::UpdateRejected(m.into()),
            ParticipantMessage::CloseRequest(m) => envelope::Msg::CloseRequest(m.into()),
            ParticipantMessage::CloseAccepted(m) => envelope::Msg::CloseAccepted(m.into()),
        }
    }
}

impl TryFrom<envelope::Msg> for ParticipantMessage {
    type Error = ConversionError;

    fn try_from(value: envelope::Msg) -> Result<Self, Self::Error> {
        Ok(match value {
            envelope::Msg::InitialSignature(m) => ParticipantMessage::InitialSignature(m.try_into()?),
            envelope::Msg::ChannelUpdate(m) => ParticipantMessage::ChannelUpdate(m.try_into()?),
            envelope::Msg::UpdateAccepted(m) => ParticipantMessage::UpdateAccepted(m.try_into()?),
            envelope::Msg::UpdateRejected(m) => ParticipantMessage::UpdateRejected(m.try_into()?),
            envelope::Msg::CloseRequest(m) => ParticipantMessage::CloseRequest(m.try_into()?),
            envelope::Msg::CloseAccepted(m) => ParticipantMessage::CloseAccepted(m.try_into()?),
        })
    }
}

/// Encodes a message into a frame: a u16 big endian length followed by the
/// protobuf envelope.
pub fn encode_frame(
    sender: &Address,
    recipient: &Address,
    msg: ParticipantMessage,
) -> Result<Vec<u8>, ConversionError> {
    let envelope = Envelope {
        sender: sender.0.to_vec(),
        recipient: recipient.0.to_vec(),
        msg: Some(msg.into()),
    };
    // The length is written as a fixed u16 (2 bytes), so we cannot use
    // `encode_length_delimited`, which would write a LEB128 varint.
    let len = envelope.encoded_len();
    let prefix = u16::try_from(len).map_err(|_| ConversionError::FrameTooLarge(len))?;

    let mut buf = Vec::with_capacity(LEN_PREFIX + len);
    buf.put_slice(&prefix.to_be_bytes());
    envelope.encode(&mut buf)?;
    Ok(buf)
}

/// Inverse of [encode_frame]. The frame has to be complete: missing or extra
/// bytes are an error, as is any field that does not convert.
pub fn decode_frame(frame: &[u8]) -> Result<(Address, Address, ParticipantMessage), ConversionError> {
    if frame.len() < LEN_PREFIX {
        return Err(ConversionError::Truncated);
    }
    let (prefix, body) = frame.split_at(LEN_PREFIX);
    let declared = u16::from_be_bytes([prefix[0], prefix[1]]) as usize;
    if declared != body.len() {
        return Err(ConversionError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }

    let envelope = Envelope::decode(body)?;
    let sender: Address = fixed("sender", envelope.sender)?;
    let recipient: Address = fixed("recipient", envelope.recipient)?;
    let msg = envelope
        .msg
        .ok_or(ConversionError::ExpectedSome("msg"))?
        .try_into()?;
    Ok((sender, recipient, msg))
}

/// Puts participant messages into protobuf frames and hands them to a
/// [BytesBus].
#[derive(Debug)]
pub struct ProtoBufEncodingLayer<B: BytesBus> {
    pub bus: B,
}

impl<B: BytesBus> ProtoBufEncodingLayer<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn decode(frame: &[u8]) -> Result<(Address, Address, ParticipantMessage), ConversionError> {
        decode_frame(frame)
    }
}

impl<B: BytesBus> MessageBus for ProtoBufEncodingLayer<B> {
    fn send_to_participant(
        &self,
        sender: &Address,
        recipient: &Address,
        msg: ParticipantMessage,
    ) -> Result<(), SendError> {
        let buf = encode_frame(sender, recipient, msg)?;
        trace!(?sender, ?recipient, len = buf.len(), "Sending frame");
        self.bus.send_to_participant(sender, recipient, &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Delta;
    use parking_lot::Mutex;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[derive(Debug, Default)]
    struct RecordingBus {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl BytesBus for &RecordingBus {
        fn send_to_participant(
            &self,
            _sender: &Address,
            _recipient: &Address,
            msg: &[u8],
        ) -> Result<(), SendError> {
            self.frames.lock().push(msg.to_vec());
            Ok(())
        }
    }

    fn update(rng: &mut StdRng) -> ChannelUpdate {
        let mut state = State::initial(rng.gen(), 0, 100.into(), 0.into())
            .apply(Delta::from_a(10.into()))
            .unwrap();
        state.set_app_data(b"gg".to_vec()).unwrap();
        ChannelUpdate {
            state,
            actor_idx: 0,
            sig: rng.gen(),
        }
    }

    #[test]
    fn channel_update_survives_the_wire() {
        let mut rng = StdRng::seed_from_u64(0);
        let (alice, bob): (Address, Address) = (rng.gen(), rng.gen());
        let msg = ParticipantMessage::ChannelUpdate(update(&mut rng));

        let frame = encode_frame(&alice, &bob, msg.clone()).unwrap();
        let declared = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(declared, frame.len() - 2);
        assert_eq!(decode_frame(&frame).unwrap(), (alice, bob, msg));
    }

    #[test]
    fn encoding_layer_forwards_frames() {
        let mut rng = StdRng::seed_from_u64(1);
        let (alice, bob): (Address, Address) = (rng.gen(), rng.gen());
        let recorder = RecordingBus::default();
        let layer = ProtoBufEncodingLayer::new(&recorder);
        let msg = ParticipantMessage::UpdateRejected(UpdateRejected {
            channel_id: rng.gen(),
            nonce: 4,
            reason: "insufficient balance".into(),
        });

        layer.send_to_participant(&alice, &bob, msg.clone()).unwrap();
        let frames = recorder.frames.lock();
        assert_eq!(frames.len(), 1);
        let (_, _, decoded) = ProtoBufEncodingLayer::<&RecordingBus>::decode(&frames[0]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_bad_framing() {
        let mut rng = StdRng::seed_from_u64(2);
        let (alice, bob): (Address, Address) = (rng.gen(), rng.gen());
        let msg = ParticipantMessage::CloseRequest(CloseRequest {
            channel_id: rng.gen(),
            nonce: 2,
        });
        let frame = encode_frame(&alice, &bob, msg).unwrap();

        assert_eq!(decode_frame(&frame[..1]), Err(ConversionError::Truncated));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(ConversionError::LengthMismatch { .. })
        ));
        let mut longer = frame.clone();
        longer.push(0);
        assert!(matches!(
            decode_frame(&longer),
            Err(ConversionError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn decode_rejects_malformed_fields() {
        let mut rng = StdRng::seed_from_u64(3);
        let (alice, bob): (Address, Address) = (rng.gen(), rng.gen());

        let frame_of = |envelope: Envelope| {
            let mut buf = (envelope.encoded_len() as u16).to_be_bytes().to_vec();
            envelope.encode(&mut buf).unwrap();
            buf
        };

        // Short signature
        let mut wire: ChannelUpdateMsg = update(&mut rng).into();
        wire.sig.pop();
        let frame = frame_of(Envelope {
            sender: alice.0.to_vec(),
            recipient: bob.0.to_vec(),
            msg: Some(envelope::Msg::ChannelUpdate(wire)),
        });
        assert_eq!(
            decode_frame(&frame),
            Err(ConversionError::ByteLengthMismatch {
                field: "sig",
                expected: 65,
                got: 64
            })
        );

        // Non-canonical state encoding
        let mut wire: ChannelUpdateMsg = update(&mut rng).into();
        let last = wire.state.len() - 1;
        wire.state[last] = 1;
        let frame = frame_of(Envelope {
            sender: alice.0.to_vec(),
            recipient: bob.0.to_vec(),
            msg: Some(envelope::Msg::ChannelUpdate(wire)),
        });
        assert!(matches!(
            decode_frame(&frame),
            Err(ConversionError::State(abiencode::Error::NonZeroPadding(_)))
        ));

        // Actor out of range
        let mut wire: ChannelUpdateMsg = update(&mut rng).into();
        wire.actor_idx = 2;
        let frame = frame_of(Envelope {
            sender: alice.0.to_vec(),
            recipient: bob.0.to_vec(),
            msg: Some(envelope::Msg::ChannelUpdate(wire)),
        });
        assert_eq!(
            decode_frame(&frame),
            Err(ConversionError::InvalidParticipant(2))
        );

        // No message at all
        let frame = frame_of(Envelope {
            sender: alice.0.to_vec(),
            recipient: bob.0.to_vec(),
            msg: None,
        });
        assert_eq!(
            decode_frame(&frame),
            Err(ConversionError::ExpectedSome("msg"))
        );

        // Garbage body
        let frame = [0, 3, 0xff, 0xff, 0xff];
        assert!(matches!(
            decode_frame(&frame),
            Err(ConversionError::Decode(_))
        ));
    }
}

//! Protobuf schema of the participant wire format.
//!
//! States are not split into protobuf fields: they are carried as their
//! canonical encoding, the same bytes the signatures are over.

#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    #[prost(bytes = "vec", tag = "1")]
    pub sender: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub recipient: Vec<u8>,
    #[prost(oneof = "envelope::Msg", tags = "3, 4, 5, 6, 7, 8")]
    pub msg: Option<envelope::Msg>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Msg {
        #[prost(message, tag = "3")]
        InitialSignature(super::InitialSignatureMsg),
        #[prost(message, tag = "4")]
        ChannelUpdate(super::ChannelUpdateMsg),
        #[prost(message, tag = "5")]
        UpdateAccepted(super::UpdateAccMsg),
        #[prost(message, tag = "6")]
        UpdateRejected(super::UpdateRejMsg),
        #[prost(message, tag = "7")]
        CloseRequest(super::CloseReqMsg),
        #[prost(message, tag = "8")]
        CloseAccepted(super::CloseAccMsg),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InitialSignatureMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub nonce: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub sig: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChannelUpdateMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub state: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub actor_idx: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub sig: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateAccMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub nonce: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub sig: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateRejMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub nonce: u64,
    #[prost(string, tag = "3")]
    pub reason: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CloseReqMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub nonce: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CloseAccMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub nonce: u64,
}

//! Signaling: transport traits, connection events, group status lookup and
//! the administrative HTTP API.

pub mod admin;
pub mod events;
pub mod status;
pub mod testing;
pub mod transport;

pub use events::{
    ChatEvent, ChatKind, JoinedKind, StreamEvent, StreamStats, TransferEvent, TransferInfo,
    TransferStatus, TransportEvent, UserEntry, UserEventKind, UserMessageEvent, UserMessageKind,
    WireTimestamp,
};
pub use transport::{
    DownstreamHandle, FilePayload, FileTransferHandle, RtpEncoding, SignalingTransport,
    TrackDirection, TransceiverInit, TransportFactory, UpstreamHandle,
};

//! Signaling transport traits.
//!
//! The session controller drives a [`SignalingTransport`] and consumes the
//! event stream returned by its [`TransportFactory`]. The traits keep the
//! controller testable: production code plugs in a WebSocket-backed
//! implementation, tests plug in a scripted fake.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use causerie_media::MediaTrack;
use causerie_shared::types::{Credential, LocalStreamId, MediaKind, ParticipantId};
use causerie_shared::SessionError;

use crate::events::{StreamEvent, TransferEvent, TransferInfo, TransportEvent};

/// Direction of a media transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackDirection {
    SendOnly,
    RecvOnly,
    SendRecv,
}

/// One simulcast encoding layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RtpEncoding {
    pub rid: String,
    pub scale_resolution_down_by: Option<f64>,
    pub max_bitrate: Option<u32>,
}

impl RtpEncoding {
    pub fn rid(rid: &str) -> Self {
        Self {
            rid: rid.to_string(),
            scale_resolution_down_by: None,
            max_bitrate: None,
        }
    }
}

/// Parameters for attaching a track to an upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct TransceiverInit {
    pub direction: TrackDirection,
    pub encodings: Vec<RtpEncoding>,
}

impl Default for TransceiverInit {
    fn default() -> Self {
        Self {
            direction: TrackDirection::SendOnly,
            encodings: Vec::new(),
        }
    }
}

/// A file offered for sending.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePayload {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One outgoing media publication.
pub trait UpstreamHandle: Send + Sync {
    /// Client-chosen id, stable across replacement.
    fn local_id(&self) -> LocalStreamId;

    fn label(&self) -> Option<String>;

    fn set_label(&self, label: &str);

    fn add_track(&self, track: MediaTrack, init: TransceiverInit);

    fn tracks(&self) -> Vec<MediaTrack>;

    fn close(&self);
}

/// One incoming media subscription.
pub trait DownstreamHandle: Send + Sync {
    fn id(&self) -> String;

    fn local_id(&self) -> Option<LocalStreamId>;

    fn label(&self) -> String;

    fn source(&self) -> Option<ParticipantId>;

    fn username(&self) -> Option<String>;

    /// Requests receiver statistics on the given cadence, in milliseconds.
    fn set_stats_interval(&self, interval_ms: u64);

    /// Takes the per-stream event channel. One-shot.
    fn take_events(&self) -> Option<mpsc::Receiver<StreamEvent>>;

    fn close(&self);
}

/// One file transfer, inbound or outbound.
pub trait FileTransferHandle: Send + Sync {
    fn info(&self) -> TransferInfo;

    /// Accepts an inbound transfer.
    fn receive(&self);

    fn cancel(&self);

    /// Takes the progress event channel. One-shot.
    fn take_events(&self) -> Option<mpsc::Receiver<TransferEvent>>;
}

/// The protocol surface of one signaling connection.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Server-assigned id for this client, once connected.
    fn local_id(&self) -> Option<ParticipantId>;

    /// Snapshot of the remote participants the server has reported.
    fn users(&self) -> HashMap<ParticipantId, crate::events::UserEntry>;

    async fn join(
        &self,
        group: &str,
        username: &str,
        credential: &Credential,
    ) -> Result<(), SessionError>;

    /// Declares which streams this client wants to receive, as
    /// (label, kinds) pairs.
    async fn request(&self, wanted: Vec<(String, Vec<MediaKind>)>) -> Result<(), SessionError>;

    async fn chat(
        &self,
        kind: &str,
        dest: Option<&ParticipantId>,
        message: &str,
    ) -> Result<(), SessionError>;

    async fn user_message(
        &self,
        kind: &str,
        dest: Option<&ParticipantId>,
        value: Value,
    ) -> Result<(), SessionError>;

    async fn user_action(
        &self,
        kind: &str,
        target: &ParticipantId,
        value: Value,
    ) -> Result<(), SessionError>;

    async fn group_action(&self, kind: &str, value: Value) -> Result<(), SessionError>;

    /// Opens a new upstream. Passing the previous publication's id signals
    /// replacement: the server treats the new stream as a successor rather
    /// than an addition.
    async fn new_up_stream(
        &self,
        replace: Option<LocalStreamId>,
    ) -> Result<Arc<dyn UpstreamHandle>, SessionError>;

    async fn send_file(
        &self,
        dest: &ParticipantId,
        payload: FilePayload,
    ) -> Result<Arc<dyn FileTransferHandle>, SessionError>;

    async fn close(&self);
}

/// Creates signaling connections. Each call yields a fresh transport and
/// its event stream.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn SignalingTransport>, mpsc::Receiver<TransportEvent>), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_init_is_send_only() {
        let init = TransceiverInit::default();
        assert_eq!(init.direction, TrackDirection::SendOnly);
        assert!(init.encodings.is_empty());
    }

    #[test]
    fn rid_helper_sets_only_the_rid() {
        let enc = RtpEncoding::rid("h");
        assert_eq!(enc.rid, "h");
        assert!(enc.scale_resolution_down_by.is_none());
        assert!(enc.max_bitrate.is_none());
    }
}

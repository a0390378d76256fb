//! Events surfaced by a signaling connection.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use causerie_shared::types::{ParticipantId, Permission};

use crate::transport::{DownstreamHandle, FileTransferHandle};

/// Outcome kind of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinedKind {
    Join,
    Fail,
    Change,
    Redirect,
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEventKind {
    Add,
    Change,
    Delete,
}

/// Directed messages from the server or another participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserMessageKind {
    Error,
    Warning,
    Info,
    Mute,
    Kicked,
    Token,
    Other(String),
}

impl UserMessageKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "error" => Self::Error,
            "warning" => Self::Warning,
            "info" => Self::Info,
            "mute" => Self::Mute,
            "kicked" => Self::Kicked,
            "token" => Self::Token,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Message,
    Me,
    Caption,
}

/// Chat timestamps arrive either as RFC 3339 strings or as epoch
/// milliseconds, depending on server version.
#[derive(Debug, Clone, PartialEq)]
pub enum WireTimestamp {
    DateTime(DateTime<Utc>),
    EpochMillis(i64),
}

impl WireTimestamp {
    pub fn normalize(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::EpochMillis(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub source: Option<ParticipantId>,
    pub username: Option<String>,
    pub kind: ChatKind,
    /// Empty for broadcast messages.
    pub dest: Option<ParticipantId>,
    pub privileged: bool,
    pub time: Option<WireTimestamp>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserMessageEvent {
    pub source: Option<ParticipantId>,
    pub username: Option<String>,
    pub kind: UserMessageKind,
    pub privileged: bool,
    pub time: Option<WireTimestamp>,
    pub value: Value,
    /// Set when the server answers a request with a failure, e.g. a
    /// refused token request.
    pub error: Option<String>,
}

/// A remote participant as reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct UserEntry {
    pub username: Option<String>,
    pub permissions: Vec<Permission>,
    pub data: Value,
}

/// Per-downstream receiver statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamStats {
    pub audio_energy: f64,
    pub jitter_ms: f64,
    pub packets_lost: u64,
}

impl StreamStats {
    pub fn max_audio_energy(stats: &[StreamStats]) -> f64 {
        stats
            .iter()
            .map(|s| s.audio_energy)
            .fold(0.0f64, f64::max)
    }
}

/// Events emitted by a single downstream subscription.
pub enum StreamEvent {
    Error(String),
    /// `replace` is set when the server immediately renegotiates the same
    /// stream; the record should be kept for the successor.
    Close { replace: bool },
    Status(String),
    DownTrack { track: causerie_media::MediaTrack },
    Stats(Vec<StreamStats>),
}

impl std::fmt::Debug for StreamEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Self::Close { replace } => {
                f.debug_struct("Close").field("replace", replace).finish()
            }
            Self::Status(s) => f.debug_tuple("Status").field(s).finish(),
            Self::DownTrack { track } => {
                f.debug_struct("DownTrack").field("track", track).finish()
            }
            Self::Stats(s) => f.debug_tuple("Stats").field(s).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Connecting,
    Transferring,
    Done,
    Cancelled,
}

/// Progress event for one file transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub status: TransferStatus,
    /// Present on `Done` for inbound transfers: the received payload.
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferInfo {
    pub sender: ParticipantId,
    pub username: Option<String>,
    pub name: String,
    pub size: u64,
    /// True for outbound transfers.
    pub up: bool,
}

/// Top-level events from the signaling connection.
pub enum TransportEvent {
    Connected,
    Joined {
        kind: JoinedKind,
        group: String,
        permissions: Vec<Permission>,
        message: Option<String>,
    },
    User {
        id: ParticipantId,
        kind: UserEventKind,
        entry: UserEntry,
    },
    Chat(ChatEvent),
    ClearChat,
    UserMessage(UserMessageEvent),
    FileTransfer(Arc<dyn FileTransferHandle>),
    Downstream(Arc<dyn DownstreamHandle>),
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => f.write_str("Connected"),
            Self::Joined {
                kind,
                group,
                permissions,
                message,
            } => f
                .debug_struct("Joined")
                .field("kind", kind)
                .field("group", group)
                .field("permissions", permissions)
                .field("message", message)
                .finish(),
            Self::User { id, kind, .. } => f
                .debug_struct("User")
                .field("id", id)
                .field("kind", kind)
                .finish_non_exhaustive(),
            Self::Chat(chat) => f.debug_tuple("Chat").field(chat).finish(),
            Self::ClearChat => f.write_str("ClearChat"),
            Self::UserMessage(msg) => f.debug_tuple("UserMessage").field(msg).finish(),
            Self::FileTransfer(t) => {
                f.debug_struct("FileTransfer").field("info", &t.info()).finish()
            }
            Self::Downstream(d) => f
                .debug_struct("Downstream")
                .field("id", &d.id())
                .field("label", &d.label())
                .finish(),
            Self::Close { code, reason } => f
                .debug_struct("Close")
                .field("code", code)
                .field("reason", reason)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_millis_normalize() {
        let ts = WireTimestamp::EpochMillis(1_700_000_000_000);
        assert_eq!(ts.normalize().timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn datetime_normalize_is_identity() {
        let now = Utc::now();
        assert_eq!(WireTimestamp::DateTime(now).normalize(), now);
    }

    #[test]
    fn max_audio_energy_over_tracks() {
        let stats = [
            StreamStats {
                audio_energy: 1e-5,
                ..Default::default()
            },
            StreamStats {
                audio_energy: 2e-3,
                ..Default::default()
            },
        ];
        assert_eq!(StreamStats::max_audio_energy(&stats), 2e-3);
    }

    #[test]
    fn user_message_kind_parse() {
        assert_eq!(UserMessageKind::parse("kicked"), UserMessageKind::Kicked);
        assert_eq!(
            UserMessageKind::parse("handraise"),
            UserMessageKind::Other("handraise".to_string())
        );
    }
}

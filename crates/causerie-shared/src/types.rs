use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-assigned participant id. Usernames are not unique; this is the
/// only stable key for a remote participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Client-chosen stable id for an upstream publication. Reusing the same id
/// on a new publication signals "replace" rather than "add" to the far end.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LocalStreamId(pub Uuid);

impl LocalStreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalStreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalStreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Label attached to an upstream publication.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StreamLabel {
    Camera,
    Screenshare,
}

impl StreamLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Screenshare => "screenshare",
        }
    }
}

impl std::fmt::Display for StreamLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential presented when joining a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Credential {
    None,
    Password(String),
    Token(String),
}

impl Credential {
    pub fn password(&self) -> Option<&str> {
        match self {
            Self::Password(p) => Some(p),
            _ => None,
        }
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self::None
    }
}

/// Group-level permission held by a participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Permission {
    Present,
    Message,
    Op,
    Record,
    Token,
    Other(String),
}

impl Permission {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Present => "present",
            Self::Message => "message",
            Self::Op => "op",
            Self::Record => "record",
            Self::Token => "token",
            Self::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "present" => Self::Present,
            "message" => Self::Message,
            "op" => Self::Op,
            "record" => Self::Record,
            "token" => Self::Token,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Connection lifecycle state published to the UI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

/// Media kind requested from the server for a given label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_roundtrip() {
        for s in ["present", "message", "op", "record", "token"] {
            assert_eq!(Permission::parse(s).as_str(), s);
        }
        let other = Permission::parse("caption");
        assert_eq!(other, Permission::Other("caption".to_string()));
        assert_eq!(other.as_str(), "caption");
    }

    #[test]
    fn stream_labels() {
        assert_eq!(StreamLabel::Camera.as_str(), "camera");
        assert_eq!(StreamLabel::Screenshare.as_str(), "screenshare");
    }
}

//! Scripted signaling fakes for tests.
//!
//! [`FakeFactory`] hands out [`FakeTransport`]s and records every connect;
//! tests drive the session by emitting [`TransportEvent`]s through the
//! matching [`FakeSession`] and assert on the calls the transport recorded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use causerie_media::MediaTrack;
use causerie_shared::types::{Credential, LocalStreamId, MediaKind, ParticipantId};
use causerie_shared::SessionError;

use crate::events::{
    StreamEvent, TransferEvent, TransferInfo, TransportEvent, UserEntry,
};
use crate::transport::{
    DownstreamHandle, FilePayload, FileTransferHandle, SignalingTransport, TransceiverInit,
    TransportFactory, UpstreamHandle,
};

/// Every call a [`FakeTransport`] records.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Join {
        group: String,
        username: String,
        credential: Credential,
    },
    Request(Vec<(String, Vec<MediaKind>)>),
    Chat {
        kind: String,
        dest: Option<ParticipantId>,
        message: String,
    },
    UserMessage {
        kind: String,
        dest: Option<ParticipantId>,
        value: Value,
    },
    UserAction {
        kind: String,
        target: ParticipantId,
        value: Value,
    },
    GroupAction {
        kind: String,
        value: Value,
    },
    NewUpStream {
        replace: Option<LocalStreamId>,
    },
    SendFile {
        dest: ParticipantId,
        name: String,
    },
    Close,
}

#[derive(Default)]
struct FakeUpstreamState {
    label: Option<String>,
    tracks: Vec<(MediaTrack, TransceiverInit)>,
    closed: bool,
}

pub struct FakeUpstream {
    local_id: LocalStreamId,
    state: Mutex<FakeUpstreamState>,
}

impl FakeUpstream {
    fn new(local_id: LocalStreamId) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            state: Mutex::new(FakeUpstreamState::default()),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// The (track, init) pairs added so far.
    pub fn added(&self) -> Vec<(MediaTrack, TransceiverInit)> {
        self.state.lock().unwrap().tracks.clone()
    }
}

impl UpstreamHandle for FakeUpstream {
    fn local_id(&self) -> LocalStreamId {
        self.local_id
    }

    fn label(&self) -> Option<String> {
        self.state.lock().unwrap().label.clone()
    }

    fn set_label(&self, label: &str) {
        self.state.lock().unwrap().label = Some(label.to_string());
    }

    fn add_track(&self, track: MediaTrack, init: TransceiverInit) {
        self.state.lock().unwrap().tracks.push((track, init));
    }

    fn tracks(&self) -> Vec<MediaTrack> {
        self.state
            .lock()
            .unwrap()
            .tracks
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

pub struct FakeDownstream {
    id: String,
    local_id: Option<LocalStreamId>,
    label: String,
    source: Option<ParticipantId>,
    username: Option<String>,
    stats_interval: Mutex<Option<u64>>,
    events: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
    closed: AtomicBool,
}

impl FakeDownstream {
    /// Builds a downstream plus the sender a test uses to script its
    /// events.
    pub fn new(
        id: &str,
        label: &str,
        source: Option<ParticipantId>,
        username: Option<String>,
    ) -> (Arc<Self>, mpsc::Sender<StreamEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let down = Arc::new(Self {
            id: id.to_string(),
            local_id: None,
            label: label.to_string(),
            source,
            username,
            stats_interval: Mutex::new(None),
            events: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
        });
        (down, tx)
    }

    pub fn stats_interval(&self) -> Option<u64> {
        *self.stats_interval.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DownstreamHandle for FakeDownstream {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn local_id(&self) -> Option<LocalStreamId> {
        self.local_id
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn source(&self) -> Option<ParticipantId> {
        self.source.clone()
    }

    fn username(&self) -> Option<String> {
        self.username.clone()
    }

    fn set_stats_interval(&self, interval_ms: u64) {
        *self.stats_interval.lock().unwrap() = Some(interval_ms);
    }

    fn take_events(&self) -> Option<mpsc::Receiver<StreamEvent>> {
        self.events.lock().unwrap().take()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeTransfer {
    info: TransferInfo,
    received: AtomicBool,
    cancelled: AtomicBool,
    events: Mutex<Option<mpsc::Receiver<TransferEvent>>>,
}

impl FakeTransfer {
    pub fn new(info: TransferInfo) -> (Arc<Self>, mpsc::Sender<TransferEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let transfer = Arc::new(Self {
            info,
            received: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            events: Mutex::new(Some(rx)),
        });
        (transfer, tx)
    }

    pub fn was_received(&self) -> bool {
        self.received.load(Ordering::SeqCst)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl FileTransferHandle for FakeTransfer {
    fn info(&self) -> TransferInfo {
        self.info.clone()
    }

    fn receive(&self) {
        self.received.store(true, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events.lock().unwrap().take()
    }
}

#[derive(Default)]
struct FakeTransportState {
    calls: Vec<TransportCall>,
    local_id: Option<ParticipantId>,
    users: HashMap<ParticipantId, UserEntry>,
    upstreams: Vec<Arc<FakeUpstream>>,
    fail_join: Option<String>,
}

pub struct FakeTransport {
    state: Mutex<FakeTransportState>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeTransportState::default()),
        })
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn set_local_id(&self, id: ParticipantId) {
        self.state.lock().unwrap().local_id = Some(id);
    }

    pub fn set_users(&self, users: HashMap<ParticipantId, UserEntry>) {
        self.state.lock().unwrap().users = users;
    }

    pub fn set_fail_join(&self, message: &str) {
        self.state.lock().unwrap().fail_join = Some(message.to_string());
    }

    /// Upstreams opened so far, in creation order.
    pub fn upstreams(&self) -> Vec<Arc<FakeUpstream>> {
        self.state.lock().unwrap().upstreams.clone()
    }

    pub fn was_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .any(|c| *c == TransportCall::Close)
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeTransportState::default()),
        }
    }
}

#[async_trait]
impl SignalingTransport for FakeTransport {
    fn local_id(&self) -> Option<ParticipantId> {
        self.state.lock().unwrap().local_id.clone()
    }

    fn users(&self) -> HashMap<ParticipantId, UserEntry> {
        self.state.lock().unwrap().users.clone()
    }

    async fn join(
        &self,
        group: &str,
        username: &str,
        credential: &Credential,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(TransportCall::Join {
            group: group.to_string(),
            username: username.to_string(),
            credential: credential.clone(),
        });
        if let Some(message) = &state.fail_join {
            return Err(SessionError::JoinFailed(message.clone()));
        }
        Ok(())
    }

    async fn request(&self, wanted: Vec<(String, Vec<MediaKind>)>) -> Result<(), SessionError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(TransportCall::Request(wanted));
        Ok(())
    }

    async fn chat(
        &self,
        kind: &str,
        dest: Option<&ParticipantId>,
        message: &str,
    ) -> Result<(), SessionError> {
        self.state.lock().unwrap().calls.push(TransportCall::Chat {
            kind: kind.to_string(),
            dest: dest.cloned(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn user_message(
        &self,
        kind: &str,
        dest: Option<&ParticipantId>,
        value: Value,
    ) -> Result<(), SessionError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(TransportCall::UserMessage {
                kind: kind.to_string(),
                dest: dest.cloned(),
                value,
            });
        Ok(())
    }

    async fn user_action(
        &self,
        kind: &str,
        target: &ParticipantId,
        value: Value,
    ) -> Result<(), SessionError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(TransportCall::UserAction {
                kind: kind.to_string(),
                target: target.clone(),
                value,
            });
        Ok(())
    }

    async fn group_action(&self, kind: &str, value: Value) -> Result<(), SessionError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(TransportCall::GroupAction {
                kind: kind.to_string(),
                value,
            });
        Ok(())
    }

    async fn new_up_stream(
        &self,
        replace: Option<LocalStreamId>,
    ) -> Result<Arc<dyn UpstreamHandle>, SessionError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(TransportCall::NewUpStream { replace });

        // Replacement closes the predecessor with the same id.
        if let Some(id) = replace {
            for up in &state.upstreams {
                if up.local_id() == id {
                    up.close();
                }
            }
        }

        let up = FakeUpstream::new(replace.unwrap_or_default());
        state.upstreams.push(up.clone());
        Ok(up)
    }

    async fn send_file(
        &self,
        dest: &ParticipantId,
        payload: FilePayload,
    ) -> Result<Arc<dyn FileTransferHandle>, SessionError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(TransportCall::SendFile {
                dest: dest.clone(),
                name: payload.name.clone(),
            });
        let (transfer, _tx) = FakeTransfer::new(TransferInfo {
            sender: dest.clone(),
            username: None,
            name: payload.name,
            size: payload.data.len() as u64,
            up: true,
        });
        Ok(transfer)
    }

    async fn close(&self) {
        self.state.lock().unwrap().calls.push(TransportCall::Close);
    }
}

/// One connection handed out by a [`FakeFactory`]: the transport the
/// session controller got, plus the sender that scripts its events.
pub struct FakeSession {
    pub transport: Arc<FakeTransport>,
    events: mpsc::Sender<TransportEvent>,
}

impl FakeSession {
    pub async fn emit(&self, event: TransportEvent) {
        // Receiver dropped means the controller tore the session down,
        // which is a valid end state for a test script.
        let _ = self.events.send(event).await;
    }
}

#[derive(Default)]
struct FakeFactoryState {
    connects: Vec<String>,
    sessions: Vec<Arc<FakeSession>>,
    fail_connects: u32,
}

/// Factory yielding [`FakeTransport`]s. Set `fail_connects` to make the
/// first n connection attempts fail, e.g. to exercise reconnection.
#[derive(Default)]
pub struct FakeFactory {
    state: Mutex<FakeFactoryState>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.state.lock().unwrap().sessions.clone()
    }

    /// The most recent session, if any connect succeeded.
    pub fn last_session(&self) -> Option<Arc<FakeSession>> {
        self.state.lock().unwrap().sessions.last().cloned()
    }

    pub fn set_fail_connects(&self, n: u32) {
        self.state.lock().unwrap().fail_connects = n;
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn SignalingTransport>, mpsc::Receiver<TransportEvent>), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.connects.push(url.to_string());
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(SessionError::Transport("connection refused".to_string()));
        }

        let transport = FakeTransport::new();
        let (tx, rx) = mpsc::channel(64);
        state.sessions.push(Arc::new(FakeSession {
            transport: transport.clone(),
            events: tx,
        }));
        Ok((transport, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replacement_closes_predecessor_upstream() {
        let transport = FakeTransport::new();
        let first = transport.new_up_stream(None).await.unwrap();
        let second = transport
            .new_up_stream(Some(first.local_id()))
            .await
            .unwrap();

        let ups = transport.upstreams();
        assert!(ups[0].is_closed());
        assert!(!ups[1].is_closed());
        assert_eq!(second.local_id(), first.local_id());
    }

    #[tokio::test]
    async fn factory_fails_requested_number_of_connects() {
        let factory = FakeFactory::new();
        factory.set_fail_connects(2);

        assert!(factory.connect("ws://a/ws").await.is_err());
        assert!(factory.connect("ws://a/ws").await.is_err());
        assert!(factory.connect("ws://a/ws").await.is_ok());
        assert_eq!(factory.connect_urls().len(), 3);
        assert_eq!(factory.sessions().len(), 1);
    }
}

//! Session lifecycle.
//!
//! [`SessionController`] owns the signaling connection: it resolves the
//! group endpoint, joins, dispatches transport events into the store, and
//! reconnects with exponential backoff when the connection drops without
//! the user asking for it. Reconnections keep local media alive, so the
//! camera republishes without prompting for devices again.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use causerie_media::cue::CuePlayer;
use causerie_media::debounce::Debouncer;
use causerie_media::DeviceInfo;
use causerie_shared::constants::{
    MAX_RECONNECT_ATTEMPTS, RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS,
};
use causerie_shared::types::{ConnectionState, Credential, MediaKind, ParticipantId, Permission};
use causerie_shared::{MediaError, SessionError};
use causerie_signal::status::resolve_endpoint;
use causerie_signal::{
    ChatEvent, FilePayload, JoinedKind, SignalingTransport, TransportEvent, TransportFactory,
    UserEventKind, UserMessageEvent, UserMessageKind,
};

use crate::publications::MediaManager;
use crate::store::{ChatMessageRecord, RoomStore};
use crate::transfers::TransferManager;

/// Everything needed to join a group.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Server base URL, e.g. `https://sfu.example.org`.
    pub server: String,
    pub group: String,
    pub username: String,
    pub credential: Credential,
}

/// Backoff before reconnection attempt `n` (1-based): doubles from the
/// base delay, capped.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let ms = RECONNECT_BASE_DELAY_MS.saturating_mul(1u64 << shift);
    Duration::from_millis(ms.min(RECONNECT_MAX_DELAY_MS))
}

/// How long settings changes are coalesced before a device recapture.
const SETTINGS_DEBOUNCE: Duration = Duration::from_millis(250);

pub struct SessionController {
    store: Arc<RoomStore>,
    media: Arc<MediaManager>,
    transfers: TransferManager,
    factory: Arc<dyn TransportFactory>,
    cue: Arc<dyn CuePlayer>,
    http: reqwest::Client,

    config: Mutex<Option<SessionConfig>>,
    transport: Mutex<Option<Arc<dyn SignalingTransport>>>,
    /// Bumped on every user-driven connect and disconnect. Event loops and
    /// retry timers from an older generation find themselves stale and
    /// stop, instead of fighting the new connection.
    generation: AtomicU64,
    attempts: AtomicU32,
    intentional: AtomicBool,
    fatal: AtomicBool,

    token_waiter: Mutex<Option<oneshot::Sender<Result<String, SessionError>>>>,
    settings_debounce: Mutex<Debouncer>,
}

impl SessionController {
    pub fn new(
        store: Arc<RoomStore>,
        media: Arc<MediaManager>,
        factory: Arc<dyn TransportFactory>,
        cue: Arc<dyn CuePlayer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transfers: TransferManager::new(store.clone()),
            store,
            media,
            factory,
            cue,
            http: reqwest::Client::new(),
            config: Mutex::new(None),
            transport: Mutex::new(None),
            generation: AtomicU64::new(0),
            attempts: AtomicU32::new(0),
            intentional: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            token_waiter: Mutex::new(None),
            settings_debounce: Mutex::new(Debouncer::new(SETTINGS_DEBOUNCE)),
        })
    }

    pub fn store(&self) -> &Arc<RoomStore> {
        &self.store
    }

    pub fn media(&self) -> &Arc<MediaManager> {
        &self.media
    }

    /// Connects and joins. Returns once the signaling connection is up;
    /// join progress is reported through the store.
    pub async fn connect(self: &Arc<Self>, config: SessionConfig) -> Result<(), SessionError> {
        info!(group = %config.group, username = %config.username, "Connecting");
        *self.config.lock().expect("session lock poisoned") = Some(config);
        self.intentional.store(false, Ordering::SeqCst);
        self.fatal.store(false, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);
        // Latest parameters win: bumping the generation orphans any event
        // loop or retry timer still serving the previous connection.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let previous = self.transport.lock().expect("session lock poisoned").take();
        if let Some(previous) = previous {
            previous.close().await;
        }
        self.establish(generation).await
    }

    /// Leaves the group. Quiet: no cue, no reconnection.
    pub async fn disconnect(&self) {
        info!("Disconnecting");
        self.intentional.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);

        let transport = self.transport.lock().expect("session lock poisoned").take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        self.media.teardown().await;
        self.fail_token_waiter();
        self.store.clear_remote();
        self.store.joined_group.set(None);
        self.store.connection.set(ConnectionState::Disconnected);
    }

    async fn establish(self: &Arc<Self>, generation: u64) -> Result<(), SessionError> {
        let config = self
            .config
            .lock()
            .expect("session lock poisoned")
            .clone()
            .ok_or(SessionError::NotConnected)?;

        self.store.connection.set(ConnectionState::Connecting);
        // A ws(s) URL is taken as the endpoint itself; an http(s) base
        // goes through the group status lookup.
        let endpoint = if config.server.starts_with("ws://") || config.server.starts_with("wss://")
        {
            config.server.clone()
        } else {
            resolve_endpoint(&self.http, &config.server, &config.group).await
        };
        debug!(%endpoint, "Opening signaling connection");

        let (transport, events) = self.factory.connect(&endpoint).await?;
        *self.transport.lock().expect("session lock poisoned") = Some(transport.clone());

        let this = self.clone();
        tokio::spawn(async move {
            this.run_events(generation, config, transport, events).await;
        });
        Ok(())
    }

    async fn run_events(
        self: Arc<Self>,
        generation: u64,
        config: SessionConfig,
        transport: Arc<dyn SignalingTransport>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        let mut close_reason: Option<String> = None;

        while let Some(event) = events.recv().await {
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!("Stale event loop, stopping");
                return;
            }
            match event {
                TransportEvent::Connected => {
                    if let Err(e) = transport
                        .join(&config.group, &config.username, &config.credential)
                        .await
                    {
                        warn!(error = %e, "Join request failed");
                        self.store.last_error.set(Some(e.to_string()));
                    }
                }
                TransportEvent::Joined {
                    kind,
                    group,
                    permissions,
                    message,
                } => {
                    self.handle_joined(&transport, kind, group, permissions, message)
                        .await;
                }
                TransportEvent::User { id, kind, entry } => match kind {
                    UserEventKind::Add | UserEventKind::Change => {
                        self.store.users.insert(id, entry);
                    }
                    UserEventKind::Delete => {
                        self.store.users.remove(&id);
                    }
                },
                TransportEvent::Chat(chat) => self.handle_chat(chat),
                TransportEvent::ClearChat => self.store.clear_chat(),
                TransportEvent::UserMessage(msg) => self.handle_user_message(msg).await,
                TransportEvent::FileTransfer(handle) => {
                    self.transfers.track(handle, save_received_file);
                }
                TransportEvent::Downstream(down) => {
                    crate::downstream::watch_downstream(self.store.clone(), down);
                }
                TransportEvent::Close { code, reason } => {
                    debug!(?code, ?reason, "Signaling connection closed");
                    close_reason = reason;
                    break;
                }
            }
        }

        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.handle_close(generation, close_reason);
    }

    async fn handle_joined(
        &self,
        transport: &Arc<dyn SignalingTransport>,
        kind: JoinedKind,
        group: String,
        permissions: Vec<causerie_shared::types::Permission>,
        message: Option<String>,
    ) {
        match kind {
            JoinedKind::Join => {
                info!(%group, "Joined group");
                self.attempts.store(0, Ordering::SeqCst);
                self.store.connection.set(ConnectionState::Connected);
                self.store.joined_group.set(Some(group));
                self.store.permissions.set(permissions);
                self.store.local_participant_id.set(transport.local_id());
                for (id, entry) in transport.users() {
                    self.store.users.insert(id, entry);
                }

                // Receive everything the group offers, screenshares included.
                let wanted = vec![
                    (String::new(), vec![MediaKind::Audio, MediaKind::Video]),
                    (
                        "screenshare".to_string(),
                        vec![MediaKind::Audio, MediaKind::Video],
                    ),
                ];
                if let Err(e) = transport.request(wanted).await {
                    warn!(error = %e, "Media request failed");
                }

                // A rejoin republishes what we already have; otherwise
                // this is a first join, which goes in microphone-only.
                let camera_republished = self.media.attach(transport.clone()).await;
                if !camera_republished {
                    if let Err(e) = self.media.publish_camera().await {
                        warn!(error = %e, "Could not publish microphone on join");
                        self.store.last_error.set(Some(e.to_string()));
                    }
                }
            }
            JoinedKind::Fail => {
                let reason = message.unwrap_or_else(|| "join failed".to_string());
                warn!(%group, %reason, "Join refused");
                self.fatal.store(true, Ordering::SeqCst);
                self.store.last_error.set(Some(reason));
                transport.close().await;
            }
            JoinedKind::Change => {
                self.store.permissions.set(permissions);
                for (id, entry) in transport.users() {
                    self.store.users.insert(id, entry);
                }
            }
            JoinedKind::Redirect => {
                // Leave quietly and surface the target; the embedding
                // application decides whether to follow.
                let target = message.unwrap_or_default();
                info!(%target, "Server redirect");
                self.store.redirect_target.set(Some(target));
                self.disconnect().await;
            }
            JoinedKind::Leave => {
                self.store.joined_group.set(None);
                self.store.clear_remote();
            }
        }
    }

    fn handle_chat(&self, chat: ChatEvent) {
        self.store.push_chat(ChatMessageRecord {
            id: Uuid::new_v4(),
            source: chat.source,
            username: chat.username,
            kind: chat.kind,
            dest: chat.dest,
            privileged: chat.privileged,
            time: chat
                .time
                .map(|t| t.normalize())
                .unwrap_or_else(chrono::Utc::now),
            value: chat.value,
        });
    }

    async fn handle_user_message(&self, msg: UserMessageEvent) {
        match &msg.kind {
            UserMessageKind::Error | UserMessageKind::Warning | UserMessageKind::Info => {
                // Only the server and operators get to put text in front
                // of the user.
                if !msg.privileged {
                    warn!(from = ?msg.username, kind = ?msg.kind, "Dropping unprivileged server message");
                    return;
                }
                let text = value_as_text(&msg.value);
                warn!(from = ?msg.username, %text, "Server message");
                self.store.last_error.set(Some(text));
            }
            UserMessageKind::Mute => {
                // Only operators may mute us remotely.
                if msg.privileged {
                    let from = msg
                        .username
                        .clone()
                        .unwrap_or_else(|| "an operator".to_string());
                    info!(%from, "Muted remotely");
                    self.media.set_muted(true);
                    self.store
                        .last_error
                        .set(Some(format!("You have been muted by {from}")));
                } else {
                    debug!(from = ?msg.username, "Ignoring unprivileged mute");
                }
            }
            UserMessageKind::Kicked => {
                let text = value_as_text(&msg.value);
                warn!(%text, "Kicked from group");
                self.fatal.store(true, Ordering::SeqCst);
                self.store.last_error.set(Some(format!("kicked: {text}")));
                // Do not wait for the server: close so terminal cleanup
                // runs promptly.
                if let Ok(transport) = self.transport() {
                    transport.close().await;
                }
            }
            UserMessageKind::Token => {
                let result = match &msg.error {
                    Some(e) => Err(SessionError::TokenRequest(e.clone())),
                    None => Ok(value_as_text(&msg.value)),
                };
                if let Some(waiter) = self
                    .token_waiter
                    .lock()
                    .expect("session lock poisoned")
                    .take()
                {
                    let _ = waiter.send(result);
                } else {
                    debug!("Unsolicited token message");
                }
            }
            UserMessageKind::Other(kind) => {
                debug!(%kind, "Unhandled user message");
            }
        }
    }

    fn handle_close(self: &Arc<Self>, generation: u64, reason: Option<String>) {
        self.store.clear_remote();
        self.media.detach();
        self.fail_token_waiter();
        *self.transport.lock().expect("session lock poisoned") = None;

        if self.intentional.load(Ordering::SeqCst) {
            debug!("Intentional close, staying down");
            self.store.connection.set(ConnectionState::Disconnected);
            return;
        }

        if self.fatal.load(Ordering::SeqCst) {
            self.store.connection.set(ConnectionState::Disconnected);
            if let Some(reason) = reason {
                self.store.last_error.set(Some(reason));
            }
            self.cue.play_disconnect();
            self.teardown_media();
            return;
        }

        self.schedule_retry(generation);
    }

    fn schedule_retry(self: &Arc<Self>, generation: u64) {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > MAX_RECONNECT_ATTEMPTS {
            warn!("Giving up after {MAX_RECONNECT_ATTEMPTS} reconnection attempts");
            self.store.connection.set(ConnectionState::Disconnected);
            self.store
                .last_error
                .set(Some("connection lost".to_string()));
            self.cue.play_disconnect();
            self.teardown_media();
            return;
        }

        // Still trying: the user sees "connecting", not a dead session.
        self.store.connection.set(ConnectionState::Connecting);
        let delay = reconnect_delay(attempt);
        warn!(attempt, ?delay, "Reconnecting after connection loss");
        self.store.last_error.set(Some(format!(
            "reconnecting ({attempt}/{MAX_RECONNECT_ATTEMPTS})"
        )));

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if let Err(e) = this.establish(generation).await {
                warn!(error = %e, "Reconnection attempt failed");
                this.schedule_retry(generation);
            }
        });
    }

    fn teardown_media(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            this.media.teardown().await;
        });
    }

    fn fail_token_waiter(&self) {
        if let Some(waiter) = self
            .token_waiter
            .lock()
            .expect("session lock poisoned")
            .take()
        {
            let _ = waiter.send(Err(SessionError::NotConnected));
        }
    }

    fn transport(&self) -> Result<Arc<dyn SignalingTransport>, SessionError> {
        self.transport
            .lock()
            .expect("session lock poisoned")
            .clone()
            .ok_or(SessionError::NotConnected)
    }

    // ------------------------------------------------------------------
    // Group operations
    // ------------------------------------------------------------------

    pub async fn send_chat(
        &self,
        dest: Option<&ParticipantId>,
        message: &str,
    ) -> Result<(), SessionError> {
        self.transport()?.chat("", dest, message).await
    }

    pub async fn send_me_chat(&self, message: &str) -> Result<(), SessionError> {
        self.transport()?.chat("me", None, message).await
    }

    /// Offers a file to one participant, or to everyone but us when no
    /// destination is given.
    pub async fn send_file(
        &self,
        dest: Option<&ParticipantId>,
        payload: FilePayload,
    ) -> Result<Vec<Uuid>, SessionError> {
        let transport = self.transport()?;
        let targets: Vec<ParticipantId> = match dest {
            Some(dest) => vec![dest.clone()],
            None => {
                let me = transport.local_id();
                transport
                    .users()
                    .into_keys()
                    .filter(|id| Some(id) != me.as_ref())
                    .collect()
            }
        };

        let mut ids = Vec::with_capacity(targets.len());
        for target in &targets {
            ids.push(self.transfers.send(&transport, target, payload.clone()).await?);
        }
        Ok(ids)
    }

    pub fn accept_transfer(&self, id: &Uuid) -> Result<(), SessionError> {
        self.transfers.accept(id)
    }

    pub fn cancel_transfer(&self, id: &Uuid) -> Result<(), SessionError> {
        self.transfers.cancel(id)
    }

    pub async fn kick_user(
        &self,
        target: &ParticipantId,
        message: &str,
    ) -> Result<(), SessionError> {
        self.transport()?
            .user_action("kick", target, json!(message))
            .await
    }

    pub async fn mute_user(&self, target: &ParticipantId) -> Result<(), SessionError> {
        self.transport()?
            .user_message("mute", Some(target), Value::Null)
            .await
    }

    pub async fn set_op(&self, target: &ParticipantId, op: bool) -> Result<(), SessionError> {
        let kind = if op { "op" } else { "unop" };
        self.transport()?.user_action(kind, target, Value::Null).await
    }

    pub async fn set_presenting(
        &self,
        target: &ParticipantId,
        presenting: bool,
    ) -> Result<(), SessionError> {
        let kind = if presenting { "present" } else { "unpresent" };
        self.transport()?.user_action(kind, target, Value::Null).await
    }

    /// Asks the server for a group invitation token. One request may be in
    /// flight at a time. The token grants at most the present and message
    /// permissions we hold ourselves.
    pub async fn create_token(
        &self,
        username: Option<&str>,
        expires: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<String, SessionError> {
        let transport = self.transport()?;

        let rx = {
            let mut waiter = self.token_waiter.lock().expect("session lock poisoned");
            if waiter.is_some() {
                return Err(SessionError::TokenRequestPending);
            }
            let (tx, rx) = oneshot::channel();
            *waiter = Some(tx);
            rx
        };

        let held = self.store.permissions.get();
        let permissions: Vec<&str> = [Permission::Present, Permission::Message]
            .iter()
            .filter(|p| held.contains(p))
            .map(|p| match p {
                Permission::Present => "present",
                _ => "message",
            })
            .collect();

        let mut template = json!({ "permissions": permissions });
        if let Some(username) = username {
            template["username"] = json!(username);
        }
        if let Some(expires) = expires {
            template["expires"] = json!(expires);
        }

        if let Err(e) = transport.group_action("maketoken", template).await {
            self.token_waiter
                .lock()
                .expect("session lock poisoned")
                .take();
            return Err(e);
        }

        rx.await
            .map_err(|_| SessionError::TokenRequest("request abandoned".to_string()))?
    }

    // ------------------------------------------------------------------
    // Media controls
    // ------------------------------------------------------------------

    pub fn set_muted(&self, muted: bool) {
        self.media.set_muted(muted);
    }

    pub async fn set_video_off(&self, off: bool) -> Result<(), SessionError> {
        self.media.set_video_off(off).await
    }

    pub async fn share_screen(&self) -> Result<(), SessionError> {
        self.media.share_screen().await
    }

    pub async fn stop_screenshare(&self) {
        self.media.stop_screenshare().await;
    }

    pub fn set_volume(&self, volume: f32) {
        self.store.output_volume.set(volume.clamp(0.0, 1.0));
    }

    /// Per-participant playback volume override.
    pub fn set_user_volume(&self, user: &ParticipantId, volume: f32) {
        self.store
            .user_volumes
            .insert(user.clone(), volume.clamp(0.0, 1.0));
    }

    /// Refreshes the device lists in the store. Best effort: enumeration
    /// failures leave the previous snapshot in place.
    pub fn get_devices(&self) -> Result<(Vec<DeviceInfo>, Vec<DeviceInfo>), MediaError> {
        let (audio, video) = self.media.enumerate_devices()?;
        self.store.audio_inputs.set(audio.clone());
        self.store.video_inputs.set(video.clone());
        Ok((audio, video))
    }

    /// Selects input devices. The recapture is debounced so rapid changes
    /// in a settings dialog republish only once.
    pub fn set_devices(self: &Arc<Self>, audio: Option<String>, video: Option<String>) {
        self.store.audio_device.set(audio);
        self.store.video_device.set(video);
        self.debounced_recapture();
    }

    /// Flips a device-level audio enhancement. Requires a recapture.
    pub fn set_enhancement(self: &Arc<Self>, echo: bool, noise: bool, agc: bool) {
        self.store.echo_cancellation.set(echo);
        self.store.noise_suppression.set(noise);
        self.store.auto_gain_control.set(agc);
        self.debounced_recapture();
    }

    /// Compressor changes reach the live graph directly, no recapture.
    pub fn set_compressor_enabled(&self, enabled: bool) {
        self.store.compressor_enabled.set(enabled);
        self.media.apply_audio_settings();
    }

    pub fn set_compressor(&self, params: causerie_media::CompressorParams) {
        self.store.compressor.set(params);
        self.media.apply_audio_settings();
    }

    fn debounced_recapture(self: &Arc<Self>) {
        let this = self.clone();
        self.settings_debounce
            .lock()
            .expect("session lock poisoned")
            .call(async move {
                if this.store.local_camera.get().is_none() {
                    return;
                }
                if let Err(e) = this.media.change_devices().await {
                    warn!(error = %e, "Device change failed");
                    this.store.last_error.set(Some(e.to_string()));
                }
            });
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Default sink for received files: the user's download directory.
fn save_received_file(name: &str, data: Vec<u8>) {
    let Some(dirs) = directories::UserDirs::new() else {
        warn!("No home directory, dropping received file");
        return;
    };
    let dir = dirs
        .download_dir()
        .map(|d| d.to_path_buf())
        .unwrap_or_else(|| dirs.home_dir().to_path_buf());
    // Keep only the file name; transfers must not write outside the
    // download directory.
    let name = std::path::Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "received".to_string());
    let path = dir.join(name);
    match std::fs::write(&path, data) {
        Ok(()) => info!(path = %path.display(), "Saved received file"),
        Err(e) => warn!(path = %path.display(), error = %e, "Could not save received file"),
    }
}

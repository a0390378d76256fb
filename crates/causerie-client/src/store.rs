//! Reactive room state.
//!
//! Every piece of UI-visible state lives in a [`Slot`] or [`MapSlot`]
//! backed by a `tokio::sync::watch` channel. Writes only notify when the
//! value actually changed, so subscribers never see spurious wakeups.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use causerie_media::{AnalyserTap, CompressorParams, MediaStreamBundle, MediaTrack};
use causerie_shared::types::{ConnectionState, LocalStreamId, ParticipantId, Permission};
use causerie_signal::{ChatKind, FileTransferHandle, TransferStatus, UserEntry};

/// A single observable value.
pub struct Slot<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Slot<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Sets the value, notifying subscribers only on change.
    pub fn set(&self, value: T) {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub fn update<F: FnOnce(&mut T) -> bool>(&self, f: F) {
        self.tx.send_if_modified(f);
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone + PartialEq + Default> Default for Slot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// An observable map. Subscribers watch the whole map and diff as needed.
pub struct MapSlot<K, V> {
    tx: watch::Sender<HashMap<K, V>>,
}

impl<K, V> MapSlot<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    pub fn new() -> Self {
        let (tx, _) = watch::channel(HashMap::new());
        Self { tx }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.tx.borrow().get(key).cloned()
    }

    pub fn snapshot(&self) -> HashMap<K, V> {
        self.tx.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }

    pub fn insert(&self, key: K, value: V) {
        self.tx.send_if_modified(|map| {
            if map.get(&key) == Some(&value) {
                false
            } else {
                map.insert(key.clone(), value.clone());
                true
            }
        });
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut removed = None;
        self.tx.send_if_modified(|map| {
            removed = map.remove(key);
            removed.is_some()
        });
        removed
    }

    /// Mutates one entry in place. No notification if the key is absent or
    /// the closure returns false.
    pub fn update<F: FnOnce(&mut V) -> bool>(&self, key: &K, f: F) {
        self.tx.send_if_modified(|map| match map.get_mut(key) {
            Some(value) => f(value),
            None => false,
        });
    }

    pub fn clear(&self) {
        self.tx.send_if_modified(|map| {
            if map.is_empty() {
                false
            } else {
                map.clear();
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<HashMap<K, V>> {
        self.tx.subscribe()
    }
}

impl<K, V> Default for MapSlot<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A remote media stream, keyed by the server-side stream id.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub id: String,
    pub local_id: Option<LocalStreamId>,
    pub label: String,
    pub source: Option<ParticipantId>,
    pub username: Option<String>,
    pub tracks: Vec<MediaTrack>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessageRecord {
    pub id: Uuid,
    pub source: Option<ParticipantId>,
    pub username: Option<String>,
    pub kind: ChatKind,
    pub dest: Option<ParticipantId>,
    pub privileged: bool,
    pub time: DateTime<Utc>,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Inbound,
    Outbound,
}

/// Bookkeeping for one file transfer.
#[derive(Clone)]
pub struct FileTransferRecord {
    pub id: Uuid,
    pub direction: TransferDirection,
    pub username: Option<String>,
    pub name: String,
    pub size: u64,
    pub status: TransferStatus,
    pub handle: Arc<dyn FileTransferHandle>,
}

impl PartialEq for FileTransferRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.status == other.status
    }
}

impl std::fmt::Debug for FileTransferRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTransferRecord")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// All observable room state.
pub struct RoomStore {
    pub connection: Slot<ConnectionState>,
    pub joined_group: Slot<Option<String>>,
    pub permissions: Slot<Vec<Permission>>,
    pub local_participant_id: Slot<Option<ParticipantId>>,

    pub users: MapSlot<ParticipantId, UserEntry>,
    pub streams: MapSlot<String, StreamRecord>,
    pub speaking: MapSlot<String, bool>,

    pub chat: Slot<Vec<ChatMessageRecord>>,
    pub transfers: MapSlot<Uuid, FileTransferRecord>,

    pub local_camera: Slot<Option<MediaStreamBundle>>,
    pub local_screenshare: Slot<Option<MediaStreamBundle>>,
    pub local_speaking: Slot<bool>,
    pub input_level: Slot<Option<AnalyserTap>>,
    pub output_level: Slot<Option<AnalyserTap>>,

    pub is_muted: Slot<bool>,
    pub is_video_off: Slot<bool>,
    pub echo_cancellation: Slot<bool>,
    pub noise_suppression: Slot<bool>,
    pub auto_gain_control: Slot<bool>,
    pub compressor_enabled: Slot<bool>,
    pub compressor: Slot<CompressorParams>,
    pub audio_analysis: Slot<bool>,
    pub audio_device: Slot<Option<String>>,
    pub video_device: Slot<Option<String>>,
    pub audio_inputs: Slot<Vec<causerie_media::DeviceInfo>>,
    pub video_inputs: Slot<Vec<causerie_media::DeviceInfo>>,
    pub output_volume: Slot<f32>,
    /// Per-participant playback volume overrides, 0.0 to 1.0.
    pub user_volumes: MapSlot<ParticipantId, f32>,

    /// Set when the server redirects the client to another group. The
    /// embedding application decides what to do with it.
    pub redirect_target: Slot<Option<String>>,
    pub last_error: Slot<Option<String>>,
}

impl RoomStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connection: Slot::new(ConnectionState::Disconnected),
            joined_group: Slot::new(None),
            permissions: Slot::new(Vec::new()),
            local_participant_id: Slot::new(None),

            users: MapSlot::new(),
            streams: MapSlot::new(),
            speaking: MapSlot::new(),

            chat: Slot::new(Vec::new()),
            transfers: MapSlot::new(),

            local_camera: Slot::new(None),
            local_screenshare: Slot::new(None),
            local_speaking: Slot::new(false),
            input_level: Slot::new(None),
            output_level: Slot::new(None),

            is_muted: Slot::new(true),
            is_video_off: Slot::new(true),
            echo_cancellation: Slot::new(true),
            noise_suppression: Slot::new(true),
            auto_gain_control: Slot::new(true),
            compressor_enabled: Slot::new(true),
            compressor: Slot::new(CompressorParams::default()),
            audio_analysis: Slot::new(true),
            audio_device: Slot::new(None),
            video_device: Slot::new(None),
            audio_inputs: Slot::new(Vec::new()),
            video_inputs: Slot::new(Vec::new()),
            output_volume: Slot::new(1.0),
            user_volumes: MapSlot::new(),

            redirect_target: Slot::new(None),
            last_error: Slot::new(None),
        })
    }

    pub fn push_chat(&self, message: ChatMessageRecord) {
        self.chat.update(|log| {
            log.push(message);
            true
        });
    }

    pub fn clear_chat(&self) {
        self.chat.update(|log| {
            if log.is_empty() {
                false
            } else {
                log.clear();
                true
            }
        });
    }

    /// Drops all remote state. Local media and audio settings survive, so
    /// a reconnection republishes the same camera without re-prompting.
    pub fn clear_remote(&self) {
        self.users.clear();
        self.streams.clear();
        self.speaking.clear();
        self.user_volumes.clear();
        self.local_participant_id.set(None);
        self.permissions.set(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_notifies_only_on_change() {
        let slot = Slot::new(5u32);
        let mut rx = slot.subscribe();
        assert!(!rx.has_changed().unwrap());

        slot.set(5);
        assert!(!rx.has_changed().unwrap());

        slot.set(7);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 7);
    }

    #[test]
    fn map_slot_insert_is_idempotent() {
        let map: MapSlot<String, u32> = MapSlot::new();
        let mut rx = map.subscribe();

        map.insert("a".to_string(), 1);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        map.insert("a".to_string(), 1);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn map_slot_remove_missing_is_silent() {
        let map: MapSlot<String, u32> = MapSlot::new();
        let mut rx = map.subscribe();
        assert!(map.remove(&"a".to_string()).is_none());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn defaults_match_first_join_posture() {
        let store = RoomStore::new();
        assert!(store.is_muted.get());
        assert!(store.is_video_off.get());
        assert!(store.echo_cancellation.get());
        assert!(store.noise_suppression.get());
        assert!(store.auto_gain_control.get());
        assert!(store.compressor_enabled.get());
        assert_eq!(store.connection.get(), ConnectionState::Disconnected);
    }

    #[test]
    fn clear_remote_preserves_local_settings() {
        let store = RoomStore::new();
        store.is_muted.set(false);
        store.users.insert(
            ParticipantId::from("u1"),
            UserEntry {
                username: Some("ada".to_string()),
                permissions: Vec::new(),
                data: serde_json::Value::Null,
            },
        );
        store.local_participant_id.set(Some(ParticipantId::from("me")));

        store.clear_remote();
        assert!(store.users.is_empty());
        assert!(store.local_participant_id.get().is_none());
        assert!(!store.is_muted.get());
    }
}

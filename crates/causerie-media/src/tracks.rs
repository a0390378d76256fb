//! Local media track handles.
//!
//! A [`MediaTrack`] is a cheap clonable handle to one captured or processed
//! track. Audio tracks carry a channel of 48 kHz f32 frames; video tracks are
//! pure handles whose payload flows through the peer transport. Tracks
//! distinguish a local `stop` (release the device, no callbacks) from an
//! external `end` (device unplugged, user stopped sharing), which fires the
//! registered ended hooks in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

type EndedHook = Box<dyn Fn() + Send + Sync>;

struct TrackInner {
    id: Uuid,
    kind: TrackKind,
    enabled: AtomicBool,
    live: AtomicBool,
    ended_hooks: Mutex<Vec<EndedHook>>,
    frames: Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
}

#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    fn new(kind: TrackKind, frames: Option<mpsc::Receiver<Vec<f32>>>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4(),
                kind,
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
                ended_hooks: Mutex::new(Vec::new()),
                frames: Mutex::new(frames),
            }),
        }
    }

    /// An audio track fed by the given frame channel.
    pub fn audio(frames: mpsc::Receiver<Vec<f32>>) -> Self {
        Self::new(TrackKind::Audio, Some(frames))
    }

    /// A video track handle. Frames are carried by the peer transport.
    pub fn video() -> Self {
        Self::new(TrackKind::Video, None)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Takes the frame receiver. Returns `None` for video tracks or if the
    /// frames were already consumed (e.g. by a processing graph).
    pub fn take_frames(&self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.inner.frames.lock().expect("track lock poisoned").take()
    }

    /// Registers an ended hook. Hooks chain: a new hook never replaces a
    /// previously registered one, they all run in registration order.
    pub fn on_ended<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .ended_hooks
            .lock()
            .expect("track lock poisoned")
            .push(Box::new(hook));
    }

    /// Local stop: the track goes dead without firing ended hooks,
    /// mirroring `MediaStreamTrack.stop()` semantics.
    pub fn stop(&self) {
        self.inner.live.store(false, Ordering::SeqCst);
    }

    /// External end: the track goes dead and every registered ended hook
    /// fires, in registration order.
    pub fn end(&self) {
        if self.inner.live.swap(false, Ordering::SeqCst) {
            let hooks = self.inner.ended_hooks.lock().expect("track lock poisoned");
            for hook in hooks.iter() {
                hook();
            }
        }
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaTrack {}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

/// A set of tracks captured or assembled together, analogous to a
/// `MediaStream`.
#[derive(Debug, Clone)]
pub struct MediaStreamBundle {
    id: Uuid,
    tracks: Vec<MediaTrack>,
}

impl MediaStreamBundle {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    /// A bundle is active while at least one of its tracks is live.
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl PartialEq for MediaStreamBundle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MediaStreamBundle {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn audio_track() -> MediaTrack {
        let (_tx, rx) = mpsc::channel(1);
        MediaTrack::audio(rx)
    }

    #[test]
    fn ended_hooks_chain_in_order() {
        let track = MediaTrack::video();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        track.on_ended(move || o.lock().unwrap().push(1));
        let o = order.clone();
        track.on_ended(move || o.lock().unwrap().push(2));

        track.end();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn end_fires_hooks_once() {
        let track = MediaTrack::video();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        track.on_ended(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        track.end();
        track.end();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_does_not_fire_hooks() {
        let track = MediaTrack::video();
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        track.on_ended(move || f.store(true, Ordering::SeqCst));

        track.stop();
        assert!(!track.is_live());
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn bundle_active_while_any_track_live() {
        let audio = audio_track();
        let video = MediaTrack::video();
        let bundle = MediaStreamBundle::new(vec![audio.clone(), video.clone()]);
        assert!(bundle.is_active());

        audio.stop();
        assert!(bundle.is_active());
        video.stop();
        assert!(!bundle.is_active());
    }

    #[test]
    fn take_frames_is_one_shot() {
        let track = audio_track();
        assert!(track.take_frames().is_some());
        assert!(track.take_frames().is_none());
    }
}

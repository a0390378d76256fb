//! Upstream media publications.
//!
//! Owns the local camera and screenshare bundles, the audio pipeline, and
//! the upstream handles on the signaling transport. A camera republish
//! reuses the previous publication's local id so the far end replaces the
//! stream instead of showing a second tile.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use causerie_media::activity::LocalActivityDetector;
use causerie_media::{
    AudioPipeline, AudioSettings, CaptureConstraints, DeviceInfo, MediaCapture,
    MediaStreamBundle, TrackKind,
};
use causerie_shared::constants::{SIMULCAST_LOW_MAX_BITRATE, SIMULCAST_LOW_SCALE_DOWN};
use causerie_shared::types::StreamLabel;
use causerie_shared::{MediaError, SessionError};
use causerie_signal::{
    RtpEncoding, SignalingTransport, TrackDirection, TransceiverInit, UpstreamHandle,
};

use crate::store::RoomStore;

struct Publication {
    upstream: Arc<dyn UpstreamHandle>,
    bundle: MediaStreamBundle,
}

/// Manages local capture and the upstreams publishing it.
pub struct MediaManager {
    store: Arc<RoomStore>,
    capture: Arc<dyn MediaCapture>,
    pipeline: AudioPipeline,
    camera: Mutex<Option<Publication>>,
    screenshare: Mutex<Option<Publication>>,
    transport: Mutex<Option<Arc<dyn SignalingTransport>>>,
    local_vad: Mutex<Option<LocalActivityDetector>>,
    muted_tx: tokio::sync::watch::Sender<bool>,
}

impl MediaManager {
    pub fn new(store: Arc<RoomStore>, capture: Arc<dyn MediaCapture>) -> Arc<Self> {
        let (muted_tx, _) = tokio::sync::watch::channel(store.is_muted.get());
        Arc::new(Self {
            store,
            capture,
            pipeline: AudioPipeline::new(),
            camera: Mutex::new(None),
            screenshare: Mutex::new(None),
            transport: Mutex::new(None),
            local_vad: Mutex::new(None),
            muted_tx,
        })
    }

    fn settings(&self) -> AudioSettings {
        AudioSettings {
            echo_cancellation: self.store.echo_cancellation.get(),
            noise_suppression: self.store.noise_suppression.get(),
            auto_gain_control: self.store.auto_gain_control.get(),
            compressor_enabled: self.store.compressor_enabled.get(),
            compressor: self.store.compressor.get(),
            analysis: self.store.audio_analysis.get(),
        }
    }

    fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            audio_device: self.store.audio_device.get(),
            video_device: self.store.video_device.get(),
            echo_cancellation: self.store.echo_cancellation.get(),
            noise_suppression: self.store.noise_suppression.get(),
            auto_gain_control: self.store.auto_gain_control.get(),
            video: !self.store.is_video_off.get(),
        }
    }

    /// Camera simulcast: a full layer and a capped, downscaled one.
    /// Screenshares go out as a single layer.
    fn encodings(label: StreamLabel, kind: TrackKind) -> Vec<RtpEncoding> {
        if kind != TrackKind::Video || label != StreamLabel::Camera {
            return Vec::new();
        }
        vec![
            RtpEncoding::rid("h"),
            RtpEncoding {
                rid: "l".to_string(),
                scale_resolution_down_by: Some(SIMULCAST_LOW_SCALE_DOWN),
                max_bitrate: Some(SIMULCAST_LOW_MAX_BITRATE),
            },
        ]
    }

    /// Attaches to a freshly joined transport. Existing live bundles are
    /// republished as-is, so a reconnection does not re-prompt for
    /// devices. Returns true when a camera publication went out, so the
    /// caller knows whether a fresh microphone-only capture is needed.
    pub async fn attach(&self, transport: Arc<dyn SignalingTransport>) -> bool {
        *self.transport.lock().expect("media lock poisoned") = Some(transport.clone());
        let mut camera_republished = false;

        let existing = self
            .camera
            .lock()
            .expect("media lock poisoned")
            .as_ref()
            .map(|p| p.bundle.clone());
        if let Some(bundle) = existing {
            if bundle.is_active() {
                debug!("Republishing existing camera after reconnect");
                match self.publish_bundle(bundle, StreamLabel::Camera).await {
                    Ok(()) => camera_republished = true,
                    Err(e) => warn!(error = %e, "Could not republish camera"),
                }
            }
        }

        let screenshare = self
            .screenshare
            .lock()
            .expect("media lock poisoned")
            .as_ref()
            .map(|p| p.bundle.clone());
        if let Some(bundle) = screenshare {
            if bundle.is_active() {
                debug!("Republishing existing screenshare after reconnect");
                if let Err(e) = self.publish_bundle(bundle, StreamLabel::Screenshare).await {
                    warn!(error = %e, "Could not republish screenshare");
                }
            }
        }

        camera_republished
    }

    pub fn detach(&self) {
        *self.transport.lock().expect("media lock poisoned") = None;
    }

    fn transport(&self) -> Result<Arc<dyn SignalingTransport>, SessionError> {
        self.transport
            .lock()
            .expect("media lock poisoned")
            .clone()
            .ok_or(SessionError::NotConnected)
    }

    /// Captures camera media per the current settings and publishes it,
    /// replacing any previous camera publication. The previous capture is
    /// released first so the device is free to be reopened.
    pub async fn publish_camera(&self) -> Result<(), SessionError> {
        self.stop_camera_capture();

        let raw = self
            .capture
            .capture(&self.constraints())
            .await
            .map_err(media_err)?;

        self.pipeline.update_settings(self.settings());

        let mut tracks = Vec::new();
        for track in raw.tracks() {
            match track.kind() {
                TrackKind::Audio => {
                    let processed = self.pipeline.process(track);
                    processed.set_enabled(!self.store.is_muted.get());
                    tracks.push(processed);
                }
                TrackKind::Video => {
                    track.set_enabled(!self.store.is_video_off.get());
                    tracks.push(track.clone());
                }
            }
        }
        let bundle = MediaStreamBundle::new(tracks);

        self.store.input_level.set(self.pipeline.input_tap());
        self.store.output_level.set(self.pipeline.output_tap());
        self.start_local_vad();

        self.publish_bundle(bundle, StreamLabel::Camera).await?;
        // The raw capture bundle stays alive through the graph; only its
        // processed successor is exposed.
        Ok(())
    }

    async fn publish_bundle(
        &self,
        bundle: MediaStreamBundle,
        label: StreamLabel,
    ) -> Result<(), SessionError> {
        let transport = self.transport()?;

        let slot = match label {
            StreamLabel::Camera => &self.camera,
            StreamLabel::Screenshare => &self.screenshare,
        };

        let previous_id = {
            let mut slot = slot.lock().expect("media lock poisoned");
            slot.take().map(|previous| {
                previous.upstream.close();
                previous.upstream.local_id()
            })
        };

        let upstream = transport.new_up_stream(previous_id).await?;
        upstream.set_label(label.as_str());
        for track in bundle.tracks() {
            upstream.add_track(
                track.clone(),
                TransceiverInit {
                    direction: TrackDirection::SendOnly,
                    encodings: Self::encodings(label, track.kind()),
                },
            );
        }

        info!(%label, stream = %upstream.local_id(), replaced = previous_id.is_some(), "Publishing upstream");

        match label {
            StreamLabel::Camera => self.store.local_camera.set(Some(bundle.clone())),
            StreamLabel::Screenshare => self.store.local_screenshare.set(Some(bundle.clone())),
        }

        *slot.lock().expect("media lock poisoned") = Some(Publication { upstream, bundle });
        Ok(())
    }

    /// Starts a screenshare. Ending it from the outside (the user stops
    /// sharing through the system UI) unpublishes automatically.
    pub async fn share_screen(self: &Arc<Self>) -> Result<(), SessionError> {
        let bundle = self.capture.capture_display().await.map_err(media_err)?;

        if let Some(track) = bundle.video_track() {
            let this = Arc::downgrade(self);
            track.on_ended(move || {
                if let Some(manager) = this.upgrade() {
                    tokio::spawn(async move {
                        manager.stop_screenshare().await;
                    });
                }
            });
        }

        self.publish_bundle(bundle, StreamLabel::Screenshare).await
    }

    pub async fn stop_screenshare(&self) {
        let publication = self
            .screenshare
            .lock()
            .expect("media lock poisoned")
            .take();
        if let Some(publication) = publication {
            debug!("Stopping screenshare");
            publication.bundle.stop_all();
            publication.upstream.close();
        }
        self.store.local_screenshare.set(None);
    }

    /// Flips the microphone. The published track stays; only its enabled
    /// flag changes, so unmuting is instant.
    pub fn set_muted(&self, muted: bool) {
        self.store.is_muted.set(muted);
        let _ = self.muted_tx.send(muted);
        if let Some(publication) = self.camera.lock().expect("media lock poisoned").as_ref() {
            for track in publication.bundle.tracks() {
                if track.kind() == TrackKind::Audio {
                    track.set_enabled(!muted);
                }
            }
        }
    }

    /// Flips the camera. If video was never captured (video-off join), a
    /// republish picks it up.
    pub async fn set_video_off(&self, off: bool) -> Result<(), SessionError> {
        self.store.is_video_off.set(off);

        let has_video = self
            .camera
            .lock()
            .expect("media lock poisoned")
            .as_ref()
            .map(|p| p.bundle.video_track().is_some())
            .unwrap_or(false);

        if !off && !has_video {
            return self.publish_camera().await;
        }

        if let Some(publication) = self.camera.lock().expect("media lock poisoned").as_ref() {
            if let Some(track) = publication.bundle.video_track() {
                track.set_enabled(!off);
            }
        }
        Ok(())
    }

    /// Applies a device change: tear down the old capture and republish
    /// with the new one, keeping the same stream identity.
    pub async fn change_devices(&self) -> Result<(), SessionError> {
        info!(
            audio = ?self.store.audio_device.get(),
            video = ?self.store.video_device.get(),
            "Input devices changed"
        );
        self.publish_camera().await
    }

    /// Pushes the current audio settings into the live pipeline.
    pub fn apply_audio_settings(&self) {
        self.pipeline.update_settings(self.settings());
    }

    pub fn enumerate_devices(&self) -> Result<(Vec<DeviceInfo>, Vec<DeviceInfo>), MediaError> {
        self.capture.enumerate()
    }

    fn start_local_vad(&self) {
        let mut vad = self.local_vad.lock().expect("media lock poisoned");
        if let Some(old) = vad.take() {
            old.stop();
        }
        let Some(tap) = self.pipeline.output_tap() else {
            self.store.local_speaking.set(false);
            return;
        };
        let store = self.store.clone();
        *vad = Some(LocalActivityDetector::spawn(
            tap,
            self.muted_tx.subscribe(),
            move |speaking| store.local_speaking.set(speaking),
        ));
    }

    fn stop_camera_capture(&self) {
        if let Some(publication) = self.camera.lock().expect("media lock poisoned").as_ref() {
            publication.bundle.stop_all();
        }
        self.pipeline.reset();
        if let Some(vad) = self.local_vad.lock().expect("media lock poisoned").take() {
            vad.stop();
        }
        self.store.local_speaking.set(false);
        self.store.input_level.set(None);
        self.store.output_level.set(None);
    }

    /// Full teardown: capture, publications, pipeline. Used when the user
    /// leaves for good; plain connection loss keeps local media alive.
    pub async fn teardown(&self) {
        debug!("Tearing down local media");
        self.stop_screenshare().await;
        self.stop_camera_capture();
        if let Some(publication) = self.camera.lock().expect("media lock poisoned").take() {
            publication.upstream.close();
        }
        self.store.local_camera.set(None);
        self.detach();
    }
}

fn media_err(e: MediaError) -> SessionError {
    SessionError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use causerie_media::testing::FakeCapture;
    use causerie_signal::testing::FakeTransport;

    fn manager() -> (Arc<MediaManager>, Arc<FakeCapture>, Arc<FakeTransport>) {
        let store = RoomStore::new();
        let capture = FakeCapture::new();
        let manager = MediaManager::new(store, capture.clone());
        let transport = FakeTransport::new();
        (manager, capture, transport)
    }

    #[tokio::test]
    async fn camera_republish_reuses_stream_id() {
        let (manager, _capture, transport) = manager();
        manager.attach(transport.clone()).await;

        manager.publish_camera().await.unwrap();
        manager.publish_camera().await.unwrap();

        let ups = transport.upstreams();
        assert_eq!(ups.len(), 2);
        assert!(ups[0].is_closed());
        assert_eq!(ups[0].local_id(), ups[1].local_id());

        let calls = transport.calls();
        assert!(matches!(
            calls[0],
            causerie_signal::testing::TransportCall::NewUpStream { replace: None }
        ));
        assert!(matches!(
            calls[1],
            causerie_signal::testing::TransportCall::NewUpStream { replace: Some(_) }
        ));
    }

    #[tokio::test]
    async fn republish_releases_previous_capture() {
        let (manager, _capture, transport) = manager();
        manager.attach(transport.clone()).await;

        manager.publish_camera().await.unwrap();
        let first = manager.store.local_camera.get().unwrap();
        assert!(first.is_active());

        manager.publish_camera().await.unwrap();
        assert!(!first.is_active());
        assert!(manager.store.local_camera.get().unwrap().is_active());
    }

    #[tokio::test]
    async fn attach_reports_camera_republication() {
        let (manager, _capture, transport) = manager();
        assert!(!manager.attach(transport.clone()).await);
        manager.publish_camera().await.unwrap();

        let transport2 = FakeTransport::new();
        assert!(manager.attach(transport2.clone()).await);
        assert_eq!(transport2.upstreams().len(), 1);
    }

    #[tokio::test]
    async fn camera_video_gets_simulcast_layers() {
        let (manager, _capture, transport) = manager();
        manager.attach(transport.clone()).await;
        manager.store.is_video_off.set(false);

        manager.publish_camera().await.unwrap();

        let up = transport.upstreams().pop().unwrap();
        assert_eq!(up.label().as_deref(), Some("camera"));
        let added = up.added();
        let video = added
            .iter()
            .find(|(t, _)| t.kind() == TrackKind::Video)
            .unwrap();
        assert_eq!(video.1.encodings.len(), 2);
        assert_eq!(video.1.encodings[0].rid, "h");
        assert_eq!(video.1.encodings[1].rid, "l");
        assert_eq!(
            video.1.encodings[1].max_bitrate,
            Some(SIMULCAST_LOW_MAX_BITRATE)
        );

        let audio = added
            .iter()
            .find(|(t, _)| t.kind() == TrackKind::Audio)
            .unwrap();
        assert!(audio.1.encodings.is_empty());
    }

    #[tokio::test]
    async fn screenshare_video_is_single_layer() {
        let (manager, _capture, transport) = manager();
        manager.attach(transport.clone()).await;

        manager.share_screen().await.unwrap();

        let up = transport.upstreams().pop().unwrap();
        assert_eq!(up.label().as_deref(), Some("screenshare"));
        assert!(up.added()[0].1.encodings.is_empty());
    }

    #[tokio::test]
    async fn externally_ended_screenshare_unpublishes() {
        let (manager, _capture, transport) = manager();
        manager.attach(transport.clone()).await;
        manager.share_screen().await.unwrap();

        let bundle = manager.store.local_screenshare.get().unwrap();
        bundle.video_track().unwrap().end();
        tokio::task::yield_now().await;

        assert!(manager.store.local_screenshare.get().is_none());
        assert!(transport.upstreams()[0].is_closed());
    }

    #[tokio::test]
    async fn mute_toggles_track_enabled_without_republish() {
        let (manager, _capture, transport) = manager();
        manager.attach(transport.clone()).await;
        manager.publish_camera().await.unwrap();

        manager.set_muted(false);
        let bundle = manager.store.local_camera.get().unwrap();
        assert!(bundle.audio_track().unwrap().is_enabled());

        manager.set_muted(true);
        assert!(!bundle.audio_track().unwrap().is_enabled());
        // Still a single upstream.
        assert_eq!(transport.upstreams().len(), 1);
    }

    #[tokio::test]
    async fn capture_honours_device_and_enhancement_settings() {
        let (manager, capture, transport) = manager();
        manager.attach(transport).await;
        manager.store.audio_device.set(Some("USB Mic".to_string()));
        manager.store.noise_suppression.set(false);

        manager.publish_camera().await.unwrap();

        let request = capture.requests().pop().unwrap();
        assert_eq!(request.audio_device.as_deref(), Some("USB Mic"));
        assert!(!request.noise_suppression);
        assert!(request.echo_cancellation);
        // Video off by default.
        assert!(!request.video);
    }

    #[tokio::test]
    async fn publish_without_transport_fails() {
        let (manager, _capture, _transport) = manager();
        let err = manager.publish_camera().await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
    }

    #[tokio::test]
    async fn failed_capture_propagates() {
        let (manager, capture, transport) = manager();
        manager.attach(transport).await;
        capture.set_fail_capture(true);
        assert!(manager.publish_camera().await.is_err());
    }

    #[tokio::test]
    async fn teardown_clears_local_media() {
        let (manager, _capture, transport) = manager();
        manager.attach(transport.clone()).await;
        manager.publish_camera().await.unwrap();
        manager.share_screen().await.unwrap();

        manager.teardown().await;
        assert!(manager.store.local_camera.get().is_none());
        assert!(manager.store.local_screenshare.get().is_none());
        assert!(transport.upstreams().iter().all(|u| u.is_closed()));
    }
}

//! In-memory capture backend for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use causerie_shared::MediaError;

use crate::capture::{CaptureConstraints, DeviceInfo, MediaCapture};
use crate::tracks::{MediaStreamBundle, MediaTrack};

/// A capture backend that records every request and hands out silent
/// tracks. Frame senders for issued audio tracks are kept so tests can
/// inject audio.
#[derive(Default)]
pub struct FakeCapture {
    state: Mutex<FakeCaptureState>,
}

#[derive(Default)]
struct FakeCaptureState {
    requests: Vec<CaptureConstraints>,
    display_requests: u32,
    frame_senders: Vec<mpsc::Sender<Vec<f32>>>,
    fail_capture: bool,
    fail_display: bool,
    audio_devices: Vec<DeviceInfo>,
    video_devices: Vec<DeviceInfo>,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<CaptureConstraints> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn display_requests(&self) -> u32 {
        self.state.lock().unwrap().display_requests
    }

    /// Sender for the n-th issued audio track.
    pub fn frame_sender(&self, n: usize) -> Option<mpsc::Sender<Vec<f32>>> {
        self.state.lock().unwrap().frame_senders.get(n).cloned()
    }

    pub fn set_fail_capture(&self, fail: bool) {
        self.state.lock().unwrap().fail_capture = fail;
    }

    pub fn set_fail_display(&self, fail: bool) {
        self.state.lock().unwrap().fail_display = fail;
    }

    pub fn set_devices(&self, audio: Vec<DeviceInfo>, video: Vec<DeviceInfo>) {
        let mut state = self.state.lock().unwrap();
        state.audio_devices = audio;
        state.video_devices = video;
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn capture(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<MediaStreamBundle, MediaError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(constraints.clone());
        if state.fail_capture {
            return Err(MediaError::NoInputDevice);
        }

        let (tx, rx) = mpsc::channel(16);
        state.frame_senders.push(tx);
        let mut tracks = vec![MediaTrack::audio(rx)];
        if constraints.video {
            tracks.push(MediaTrack::video());
        }
        Ok(MediaStreamBundle::new(tracks))
    }

    async fn capture_display(&self) -> Result<MediaStreamBundle, MediaError> {
        let mut state = self.state.lock().unwrap();
        state.display_requests += 1;
        if state.fail_display {
            return Err(MediaError::DisplayCapture("declined".into()));
        }
        Ok(MediaStreamBundle::new(vec![MediaTrack::video()]))
    }

    fn enumerate(&self) -> Result<(Vec<DeviceInfo>, Vec<DeviceInfo>), MediaError> {
        let state = self.state.lock().unwrap();
        Ok((state.audio_devices.clone(), state.video_devices.clone()))
    }
}

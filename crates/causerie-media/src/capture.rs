//! Device media capture.
//!
//! [`MediaCapture`] is the seam between the session layer and the operating
//! system's devices; [`DeviceCapture`] is the cpal-backed implementation.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use causerie_shared::constants::AUDIO_SAMPLE_RATE;
use causerie_shared::MediaError;

use crate::tracks::{MediaStreamBundle, MediaTrack};

/// Constraints for a capture request, reflecting the currently selected
/// devices and the software enhancement toggles.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub audio_device: Option<String>,
    pub video_device: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// When false, an audio-only capture is requested.
    pub video: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            audio_device: None,
            video_device: None,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            video: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
}

#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Captures local media matching the constraints.
    async fn capture(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<MediaStreamBundle, MediaError>;

    /// Captures the display for a screenshare.
    async fn capture_display(&self) -> Result<MediaStreamBundle, MediaError>;

    /// Enumerates (audio input, video input) devices.
    fn enumerate(&self) -> Result<(Vec<DeviceInfo>, Vec<DeviceInfo>), MediaError>;
}

/// Frame size of the capture channel, in milliseconds.
const FRAME_SIZE_MS: u32 = 20;

/// cpal-backed capture. Audio frames are chunked into 20 ms f32 buffers and
/// fed through the track's frame channel; video tracks are handles only.
pub struct DeviceCapture {
    sample_rate: u32,
}

impl DeviceCapture {
    pub fn new() -> Self {
        Self {
            sample_rate: AUDIO_SAMPLE_RATE,
        }
    }

    fn frame_size_samples(&self) -> usize {
        (self.sample_rate as usize * FRAME_SIZE_MS as usize) / 1000
    }

    fn open_input(
        &self,
        device_id: Option<&str>,
        frame_tx: mpsc::Sender<Vec<f32>>,
        track: &MediaTrack,
    ) -> Result<(), MediaError> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = match device_id {
            Some(wanted) => host
                .input_devices()
                .map_err(|e| MediaError::DeviceError(e.to_string()))?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .or_else(|| host.default_input_device())
                .ok_or(MediaError::NoInputDevice)?,
            None => host.default_input_device().ok_or(MediaError::NoInputDevice)?,
        };

        info!(device = ?device.name(), "Using input device");

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let frame_size = self.frame_size_samples();
        let mut buffer = Vec::with_capacity(frame_size);
        let live = track.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    if !live.is_live() {
                        return;
                    }
                    buffer.extend_from_slice(data);
                    while buffer.len() >= frame_size {
                        let frame: Vec<f32> = buffer.drain(..frame_size).collect();
                        if frame_tx.try_send(frame).is_err() {
                            warn!("Audio frame channel full, dropping frame");
                        }
                    }
                },
                move |err| {
                    warn!("Audio input error: {err}");
                },
                None,
            )
            .map_err(|e| MediaError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MediaError::StreamError(e.to_string()))?;

        // Keep the stream alive; the callback becomes a no-op once the
        // track stops.
        std::mem::forget(stream);
        Ok(())
    }
}

impl Default for DeviceCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaCapture for DeviceCapture {
    async fn capture(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<MediaStreamBundle, MediaError> {
        debug!(?constraints, "Requesting media");

        // Echo cancellation, noise suppression and AGC are device-level
        // constraints; where the backend cannot honour them the capture
        // still succeeds.
        if constraints.echo_cancellation
            || constraints.noise_suppression
            || constraints.auto_gain_control
        {
            debug!(
                echo = constraints.echo_cancellation,
                noise = constraints.noise_suppression,
                agc = constraints.auto_gain_control,
                "Requesting device-level audio enhancement (best effort)"
            );
        }

        let (frame_tx, frame_rx) = mpsc::channel(16);
        let audio = MediaTrack::audio(frame_rx);
        self.open_input(constraints.audio_device.as_deref(), frame_tx, &audio)?;

        let mut tracks = vec![audio];
        if constraints.video {
            tracks.push(MediaTrack::video());
        }
        Ok(MediaStreamBundle::new(tracks))
    }

    async fn capture_display(&self) -> Result<MediaStreamBundle, MediaError> {
        Err(MediaError::DisplayCapture(
            "no display capture backend on this platform".into(),
        ))
    }

    fn enumerate(&self) -> Result<(Vec<DeviceInfo>, Vec<DeviceInfo>), MediaError> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let audio = host
            .input_devices()
            .map_err(|e| MediaError::DeviceError(e.to_string()))?
            .filter_map(|d| {
                d.name().ok().map(|name| DeviceInfo {
                    id: name.clone(),
                    label: name,
                })
            })
            .collect();

        // Video enumeration has no portable backend; the list stays empty
        // and the UI falls back to the default device.
        Ok((audio, Vec::new()))
    }
}

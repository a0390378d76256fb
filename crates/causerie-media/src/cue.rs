//! Audible disconnect cue.
//!
//! When the connection drops without the user asking for it, a short
//! descending tone is played so the loss is noticed even with the window
//! in the background.

use tracing::{debug, warn};

use causerie_shared::constants::AUDIO_SAMPLE_RATE;

/// Duration of the cue, in seconds.
const CUE_DURATION_S: f32 = 0.3;

/// Sweep endpoints, in Hz.
const CUE_START_HZ: f32 = 880.0;
const CUE_END_HZ: f32 = 440.0;

/// Renders the disconnect cue: a descending sine sweep with a linear
/// fade-out.
pub fn disconnect_tone(sample_rate: u32) -> Vec<f32> {
    let total = (sample_rate as f32 * CUE_DURATION_S) as usize;
    let mut samples = Vec::with_capacity(total);
    let mut phase = 0.0f32;
    for i in 0..total {
        let t = i as f32 / total as f32;
        let freq = CUE_START_HZ + (CUE_END_HZ - CUE_START_HZ) * t;
        phase += 2.0 * std::f32::consts::PI * freq / sample_rate as f32;
        let fade = 1.0 - t;
        samples.push(phase.sin() * 0.3 * fade);
    }
    samples
}

/// Something that can play the disconnect cue.
pub trait CuePlayer: Send + Sync {
    fn play_disconnect(&self);
}

/// Plays the cue on the default output device. Playback runs on a short
/// detached thread since cpal streams are not `Send`.
pub struct ToneCue;

impl CuePlayer for ToneCue {
    fn play_disconnect(&self) {
        std::thread::spawn(|| {
            if let Err(e) = play_tone_blocking() {
                warn!("Could not play disconnect cue: {e}");
            }
        });
    }
}

fn play_tone_blocking() -> Result<(), causerie_shared::MediaError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use causerie_shared::MediaError;

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(MediaError::NoOutputDevice)?;

    debug!(device = ?device.name(), "Playing disconnect cue");

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(AUDIO_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let samples = disconnect_tone(AUDIO_SAMPLE_RATE);
    let mut cursor = 0usize;
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                for out in data.iter_mut() {
                    *out = samples.get(cursor).copied().unwrap_or(0.0);
                    cursor += 1;
                }
            },
            |err| {
                warn!("Audio output error: {err}");
            },
            None,
        )
        .map_err(|e| MediaError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| MediaError::StreamError(e.to_string()))?;

    std::thread::sleep(std::time::Duration::from_millis(400));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_has_expected_length_and_fades_out() {
        let samples = disconnect_tone(48_000);
        assert_eq!(samples.len(), 14_400);
        assert!(samples.iter().any(|&s| s.abs() > 0.1));
        // Faded to near-silence by the end.
        assert!(samples[samples.len() - 1].abs() < 0.01);
    }
}

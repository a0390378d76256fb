//! Local audio processing pipeline.
//!
//! Captured audio flows through a fixed graph before publication:
//!
//! ```text
//! capture -> input tap -> compressor -> output tap -> published track
//! ```
//!
//! The taps feed the level meters and the local voice-activity detector.
//! When both compression and analysis are off the graph is skipped and the
//! raw track is published directly.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use causerie_shared::constants::{ANALYSER_SMOOTHING, ANALYSER_WINDOW, AUDIO_SAMPLE_RATE};

use crate::compressor::{CompressorParams, DynamicsCompressor};
use crate::tracks::MediaTrack;

/// Software audio settings, as chosen by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub compressor_enabled: bool,
    pub compressor: CompressorParams,
    /// When false, the analysis taps are not requested and the graph may
    /// be skipped entirely.
    pub analysis: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            compressor_enabled: true,
            compressor: CompressorParams::default(),
            analysis: true,
        }
    }
}

struct TapInner {
    window: Mutex<Vec<f32>>,
    smoothed_rms: Mutex<f32>,
}

/// A passive observation point in the audio graph. Holds the most recent
/// window of samples and a smoothed RMS level.
#[derive(Clone)]
pub struct AnalyserTap {
    inner: Arc<TapInner>,
}

impl AnalyserTap {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TapInner {
                window: Mutex::new(vec![0.0; ANALYSER_WINDOW]),
                smoothed_rms: Mutex::new(0.0),
            }),
        }
    }

    pub(crate) fn push(&self, frame: &[f32]) {
        let mut window = self.inner.window.lock().expect("tap lock poisoned");
        if frame.len() >= ANALYSER_WINDOW {
            window.copy_from_slice(&frame[frame.len() - ANALYSER_WINDOW..]);
        } else {
            window.drain(..frame.len());
            window.extend_from_slice(frame);
        }

        let energy: f32 = frame.iter().map(|s| s * s).sum();
        let rms = (energy / frame.len().max(1) as f32).sqrt();
        let mut smoothed = self.inner.smoothed_rms.lock().expect("tap lock poisoned");
        *smoothed = ANALYSER_SMOOTHING * *smoothed + (1.0 - ANALYSER_SMOOTHING) * rms;
    }

    /// Copies the current sample window into `out`.
    pub fn window(&self, out: &mut [f32]) {
        let window = self.inner.window.lock().expect("tap lock poisoned");
        let n = out.len().min(window.len());
        out[..n].copy_from_slice(&window[window.len() - n..]);
    }

    /// Smoothed RMS level of the most recent frames.
    pub fn rms(&self) -> f32 {
        *self.inner.smoothed_rms.lock().expect("tap lock poisoned")
    }
}

impl Default for AnalyserTap {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for AnalyserTap {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for AnalyserTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyserTap").field("rms", &self.rms()).finish()
    }
}

struct GraphHandle {
    input_tap: AnalyserTap,
    output_tap: AnalyserTap,
    params: Arc<Mutex<CompressorParams>>,
    task: JoinHandle<()>,
}

impl Drop for GraphHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns the processing graph for the local audio track. The graph is built
/// lazily on the first [`AudioPipeline::process`] call and torn down on
/// [`AudioPipeline::reset`], e.g. when the input device changes.
pub struct AudioPipeline {
    settings: Mutex<AudioSettings>,
    graph: Mutex<Option<GraphHandle>>,
}

impl AudioPipeline {
    pub fn new() -> Self {
        Self {
            settings: Mutex::new(AudioSettings::default()),
            graph: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> AudioSettings {
        self.settings.lock().expect("pipeline lock poisoned").clone()
    }

    /// Applies new settings. A live graph picks up compressor changes
    /// without rebuilding.
    pub fn update_settings(&self, settings: AudioSettings) {
        let params = if settings.compressor_enabled {
            settings.compressor
        } else {
            // Disabled compression keeps the graph but neutralises the
            // gain computer, so the analysis taps stay fed.
            CompressorParams::bypass()
        };

        if let Some(graph) = self.graph.lock().expect("pipeline lock poisoned").as_ref() {
            *graph.params.lock().expect("pipeline lock poisoned") = params;
        }
        *self.settings.lock().expect("pipeline lock poisoned") = settings;
    }

    /// Runs the raw audio track through the graph and returns the track to
    /// publish. When neither compression nor analysis is wanted, the raw
    /// track is returned untouched.
    pub fn process(&self, raw: &MediaTrack) -> MediaTrack {
        let settings = self.settings();
        if !settings.compressor_enabled && !settings.analysis {
            debug!("Audio graph skipped, publishing raw track");
            return raw.clone();
        }

        let Some(frames) = raw.take_frames() else {
            warn!("Audio track has no frame channel, publishing raw track");
            return raw.clone();
        };

        let input_tap = AnalyserTap::new();
        let output_tap = AnalyserTap::new();
        let params = Arc::new(Mutex::new(if settings.compressor_enabled {
            settings.compressor
        } else {
            CompressorParams::bypass()
        }));

        let (out_tx, out_rx) = mpsc::channel(16);
        let task = tokio::spawn(run_graph(
            frames,
            out_tx,
            input_tap.clone(),
            output_tap.clone(),
            params.clone(),
        ));

        let processed = MediaTrack::audio(out_rx);
        processed.set_enabled(raw.is_enabled());

        *self.graph.lock().expect("pipeline lock poisoned") = Some(GraphHandle {
            input_tap,
            output_tap,
            params,
            task,
        });

        debug!("Audio graph built");
        processed
    }

    /// Tap before the compressor. Feeds the incoming level meter.
    pub fn input_tap(&self) -> Option<AnalyserTap> {
        self.graph
            .lock()
            .expect("pipeline lock poisoned")
            .as_ref()
            .map(|g| g.input_tap.clone())
    }

    /// Tap after the compressor. Feeds the outgoing level meter and the
    /// local voice-activity detector.
    pub fn output_tap(&self) -> Option<AnalyserTap> {
        self.graph
            .lock()
            .expect("pipeline lock poisoned")
            .as_ref()
            .map(|g| g.output_tap.clone())
    }

    /// Tears the graph down. The next [`AudioPipeline::process`] call
    /// builds a fresh one.
    pub fn reset(&self) {
        if self.graph.lock().expect("pipeline lock poisoned").take().is_some() {
            debug!("Audio graph torn down");
        }
    }
}

impl Default for AudioPipeline {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_graph(
    mut frames: mpsc::Receiver<Vec<f32>>,
    out_tx: mpsc::Sender<Vec<f32>>,
    input_tap: AnalyserTap,
    output_tap: AnalyserTap,
    params: Arc<Mutex<CompressorParams>>,
) {
    let mut compressor = DynamicsCompressor::new(AUDIO_SAMPLE_RATE);

    while let Some(mut frame) = frames.recv().await {
        input_tap.push(&frame);

        let wanted = *params.lock().expect("pipeline lock poisoned");
        if compressor.params() != wanted {
            compressor.set_params(wanted);
        }
        compressor.process(&mut frame);

        output_tap.push(&frame);
        if out_tx.send(frame).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_track_with_sender() -> (MediaTrack, mpsc::Sender<Vec<f32>>) {
        let (tx, rx) = mpsc::channel(16);
        (MediaTrack::audio(rx), tx)
    }

    #[tokio::test]
    async fn graph_skipped_when_nothing_wanted() {
        let pipeline = AudioPipeline::new();
        pipeline.update_settings(AudioSettings {
            compressor_enabled: false,
            analysis: false,
            ..AudioSettings::default()
        });

        let (raw, _tx) = audio_track_with_sender();
        let published = pipeline.process(&raw);
        assert_eq!(published, raw);
        assert!(pipeline.input_tap().is_none());
    }

    #[tokio::test]
    async fn graph_passes_frames_and_feeds_taps() {
        let pipeline = AudioPipeline::new();
        let (raw, tx) = audio_track_with_sender();
        let published = pipeline.process(&raw);
        assert_ne!(published, raw);

        let mut out = published.take_frames().unwrap();
        tx.send(vec![0.25; 960]).await.unwrap();
        let frame = out.recv().await.unwrap();
        assert_eq!(frame.len(), 960);

        let tap = pipeline.input_tap().unwrap();
        assert!(tap.rms() > 0.0);
    }

    #[tokio::test]
    async fn disabled_compressor_keeps_graph_neutral() {
        let pipeline = AudioPipeline::new();
        pipeline.update_settings(AudioSettings {
            compressor_enabled: false,
            analysis: true,
            ..AudioSettings::default()
        });

        let (raw, tx) = audio_track_with_sender();
        let published = pipeline.process(&raw);
        let mut out = published.take_frames().unwrap();

        let frame_in = vec![0.9f32; 960];
        tx.send(frame_in.clone()).await.unwrap();
        let frame_out = out.recv().await.unwrap();
        // Neutral gain computer: samples pass unchanged.
        assert_eq!(frame_out, frame_in);
        assert!(pipeline.output_tap().is_some());
    }

    #[tokio::test]
    async fn settings_update_reaches_live_graph() {
        let pipeline = AudioPipeline::new();
        let (raw, tx) = audio_track_with_sender();
        let published = pipeline.process(&raw);
        let mut out = published.take_frames().unwrap();

        pipeline.update_settings(AudioSettings {
            compressor_enabled: false,
            ..AudioSettings::default()
        });

        let frame_in = vec![0.9f32; 960];
        tx.send(frame_in.clone()).await.unwrap();
        let frame_out = out.recv().await.unwrap();
        assert_eq!(frame_out, frame_in);
    }

    #[tokio::test]
    async fn reset_drops_taps() {
        let pipeline = AudioPipeline::new();
        let (raw, _tx) = audio_track_with_sender();
        let _published = pipeline.process(&raw);
        assert!(pipeline.input_tap().is_some());

        pipeline.reset();
        assert!(pipeline.input_tap().is_none());
    }

    #[test]
    fn tap_window_keeps_latest_samples() {
        let tap = AnalyserTap::new();
        tap.push(&vec![0.5; ANALYSER_WINDOW + 100]);
        let mut out = vec![0.0; 16];
        tap.window(&mut out);
        assert!(out.iter().all(|&s| s == 0.5));
    }
}

//! Local media: device capture, the audio processing pipeline, and
//! voice-activity detection.

pub mod activity;
pub mod capture;
pub mod compressor;
pub mod cue;
pub mod debounce;
pub mod pipeline;
pub mod testing;
pub mod tracks;

pub use capture::{CaptureConstraints, DeviceCapture, DeviceInfo, MediaCapture};
pub use compressor::CompressorParams;
pub use pipeline::{AnalyserTap, AudioPipeline, AudioSettings};
pub use tracks::{MediaStreamBundle, MediaTrack, TrackKind};

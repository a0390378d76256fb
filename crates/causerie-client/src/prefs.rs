//! Persistent user preferences.
//!
//! Device choices and audio settings are stored as JSON under the platform
//! config directory. Loading is best-effort: a missing or corrupt file
//! falls back to defaults so the client always starts.

use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use causerie_media::CompressorParams;

use crate::store::RoomStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Preferences {
    pub username: Option<String>,
    pub audio_device: Option<String>,
    pub video_device: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub compressor_enabled: bool,
    pub compressor_threshold_db: f32,
    pub compressor_ratio: f32,
    pub output_volume: f32,
}

impl Default for Preferences {
    fn default() -> Self {
        let compressor = CompressorParams::default();
        Self {
            username: None,
            audio_device: None,
            video_device: None,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            compressor_enabled: true,
            compressor_threshold_db: compressor.threshold_db,
            compressor_ratio: compressor.ratio,
            output_volume: 1.0,
        }
    }
}

impl Preferences {
    /// Captures the current store settings.
    pub fn capture(store: &RoomStore) -> Self {
        let compressor = store.compressor.get();
        Self {
            username: None,
            audio_device: store.audio_device.get(),
            video_device: store.video_device.get(),
            echo_cancellation: store.echo_cancellation.get(),
            noise_suppression: store.noise_suppression.get(),
            auto_gain_control: store.auto_gain_control.get(),
            compressor_enabled: store.compressor_enabled.get(),
            compressor_threshold_db: compressor.threshold_db,
            compressor_ratio: compressor.ratio,
            output_volume: store.output_volume.get(),
        }
    }

    /// Applies these preferences to the store.
    pub fn apply(&self, store: &RoomStore) {
        store.audio_device.set(self.audio_device.clone());
        store.video_device.set(self.video_device.clone());
        store.echo_cancellation.set(self.echo_cancellation);
        store.noise_suppression.set(self.noise_suppression);
        store.auto_gain_control.set(self.auto_gain_control);
        store.compressor_enabled.set(self.compressor_enabled);
        store.compressor.set(CompressorParams {
            threshold_db: self.compressor_threshold_db,
            ratio: self.compressor_ratio,
            ..CompressorParams::default()
        });
        store.output_volume.set(self.output_volume);
    }
}

fn prefs_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "causerie", "causerie")
        .map(|dirs| dirs.config_dir().join("preferences.json"))
}

pub fn load() -> Preferences {
    let Some(path) = prefs_path() else {
        return Preferences::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(prefs) => {
                debug!(path = %path.display(), "Loaded preferences");
                prefs
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt preferences, using defaults");
                Preferences::default()
            }
        },
        Err(_) => Preferences::default(),
    }
}

pub fn save(prefs: &Preferences) -> anyhow::Result<()> {
    let path = prefs_path().ok_or_else(|| anyhow::anyhow!("no config directory"))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(prefs)?)?;
    debug!(path = %path.display(), "Saved preferences");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_json_falls_back_to_defaults() {
        let prefs: Result<Preferences, _> = serde_json::from_str("{not json");
        assert!(prefs.is_err());
        assert_eq!(Preferences::default().compressor_ratio, 12.0);
    }

    #[test]
    fn partial_document_fills_defaults() {
        let prefs: Preferences =
            serde_json::from_str(r#"{"audio_device":"USB Mic"}"#).unwrap();
        assert_eq!(prefs.audio_device.as_deref(), Some("USB Mic"));
        assert!(prefs.echo_cancellation);
    }

    #[test]
    fn capture_apply_roundtrip() {
        let store = RoomStore::new();
        store.audio_device.set(Some("USB Mic".to_string()));
        store.compressor_enabled.set(false);
        store.output_volume.set(0.5);

        let prefs = Preferences::capture(&store);
        let other = RoomStore::new();
        prefs.apply(&other);

        assert_eq!(other.audio_device.get().as_deref(), Some("USB Mic"));
        assert!(!other.compressor_enabled.get());
        assert_eq!(other.output_volume.get(), 0.5);
    }
}

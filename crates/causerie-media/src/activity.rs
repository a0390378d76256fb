//! Voice-activity detection.
//!
//! Local activity polls the pipeline's output tap on a fixed cadence and
//! compares the level in decibels against a threshold; remote activity is
//! derived from per-stream audio energy reported by the server, with a
//! holdover so short pauses don't make the indicator flicker.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use causerie_shared::constants::{
    LOCAL_VAD_INTERVAL_MS, LOCAL_VAD_THRESHOLD_DB, REMOTE_ACTIVITY_HOLDOVER_MS,
    REMOTE_ENERGY_THRESHOLD, RMS_FLOOR,
};

use crate::pipeline::AnalyserTap;

/// Converts a linear RMS level to decibels, floored so silence maps to a
/// finite value.
pub fn rms_db(rms: f32) -> f32 {
    20.0 * rms.max(RMS_FLOOR).log10()
}

/// Polls the output tap and publishes speaking-state transitions. A muted
/// microphone always reads as not speaking.
pub struct LocalActivityDetector {
    task: JoinHandle<()>,
}

impl LocalActivityDetector {
    pub fn spawn<F>(tap: AnalyserTap, muted: watch::Receiver<bool>, publish: F) -> Self
    where
        F: Fn(bool) + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(LOCAL_VAD_INTERVAL_MS));
            let mut speaking = false;
            loop {
                interval.tick().await;
                let level = rms_db(tap.rms());
                let now = level > LOCAL_VAD_THRESHOLD_DB && !*muted.borrow();
                if now != speaking {
                    trace!(level, speaking = now, "Local voice activity changed");
                    speaking = now;
                    publish(now);
                }
            }
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for LocalActivityDetector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Per-stream remote activity state. Pure state machine over reported
/// audio energy samples, driven by the downstream stats watcher.
#[derive(Debug)]
pub struct RemoteActivity {
    last_voice: Option<Instant>,
    active: bool,
}

impl RemoteActivity {
    pub fn new() -> Self {
        Self {
            last_voice: None,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feeds one energy sample. Returns `Some(state)` when the activity
    /// state changes, `None` otherwise.
    pub fn on_energy(&mut self, energy: f64, now: Instant) -> Option<bool> {
        if energy > REMOTE_ENERGY_THRESHOLD {
            self.last_voice = Some(now);
            if !self.active {
                self.active = true;
                return Some(true);
            }
            return None;
        }

        let expired = match self.last_voice {
            Some(last) => {
                now.duration_since(last) >= Duration::from_millis(REMOTE_ACTIVITY_HOLDOVER_MS)
            }
            None => true,
        };
        if self.active && expired {
            self.active = false;
            return Some(false);
        }
        None
    }
}

impl Default for RemoteActivity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn rms_db_floors_silence() {
        assert_eq!(rms_db(0.0), rms_db(RMS_FLOOR));
        assert!(rms_db(0.0) < LOCAL_VAD_THRESHOLD_DB);
    }

    #[test]
    fn remote_activity_triggers_and_holds_over() {
        let mut activity = RemoteActivity::new();
        let t0 = Instant::now();

        assert_eq!(activity.on_energy(1e-3, t0), Some(true));
        // Energy drops, but within the holdover window.
        assert_eq!(
            activity.on_energy(0.0, t0 + Duration::from_millis(500)),
            None
        );
        assert!(activity.is_active());
        // Holdover elapsed.
        assert_eq!(
            activity.on_energy(0.0, t0 + Duration::from_millis(1500)),
            Some(false)
        );
        assert!(!activity.is_active());
    }

    #[test]
    fn remote_activity_reports_only_transitions() {
        let mut activity = RemoteActivity::new();
        let t0 = Instant::now();

        assert_eq!(activity.on_energy(1e-3, t0), Some(true));
        assert_eq!(
            activity.on_energy(1e-3, t0 + Duration::from_millis(100)),
            None
        );
    }

    #[test]
    fn sub_threshold_energy_never_activates() {
        let mut activity = RemoteActivity::new();
        assert_eq!(activity.on_energy(1e-5, Instant::now()), None);
        assert!(!activity.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn local_detector_respects_mute() {
        let tap = AnalyserTap::new();
        // A loud window, well above the threshold.
        for _ in 0..20 {
            tap_push_loud(&tap);
        }

        let (mute_tx, mute_rx) = watch::channel(true);
        let spoke = Arc::new(AtomicBool::new(false));
        let s = spoke.clone();
        let detector = LocalActivityDetector::spawn(tap, mute_rx, move |speaking| {
            s.store(speaking, Ordering::SeqCst);
        });

        tokio::time::advance(Duration::from_millis(350)).await;
        tokio::task::yield_now().await;
        assert!(!spoke.load(Ordering::SeqCst), "muted mic reported speech");

        mute_tx.send(false).unwrap();
        tokio::time::advance(Duration::from_millis(350)).await;
        tokio::task::yield_now().await;
        assert!(spoke.load(Ordering::SeqCst));

        detector.stop();
    }

    fn tap_push_loud(tap: &AnalyserTap) {
        tap.push(&vec![0.5f32; 960]);
    }
}

//! Dynamics compressor for the local audio pipeline.
//!
//! Feed-forward design: a one-pole envelope follower drives a soft-knee
//! gain computer. Parameters match the Web Audio `DynamicsCompressorNode`
//! surface: threshold in dB, ratio, attack/release in seconds, fixed knee.

use causerie_shared::constants::{
    COMPRESSOR_KNEE_DB, DEFAULT_COMPRESSOR_ATTACK_S, DEFAULT_COMPRESSOR_RATIO,
    DEFAULT_COMPRESSOR_RELEASE_S, DEFAULT_COMPRESSOR_THRESHOLD_DB, RMS_FLOOR,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorParams {
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_s: f32,
    pub release_s: f32,
    pub knee_db: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            threshold_db: DEFAULT_COMPRESSOR_THRESHOLD_DB,
            ratio: DEFAULT_COMPRESSOR_RATIO,
            attack_s: DEFAULT_COMPRESSOR_ATTACK_S,
            release_s: DEFAULT_COMPRESSOR_RELEASE_S,
            knee_db: COMPRESSOR_KNEE_DB,
        }
    }
}

impl CompressorParams {
    /// Neutral parameters: 1:1 ratio at 0 dB threshold. Used instead of
    /// tearing the graph down when compression is disabled, so the
    /// analysis taps stay alive.
    pub fn bypass() -> Self {
        Self {
            threshold_db: 0.0,
            ratio: 1.0,
            ..Self::default()
        }
    }

    pub fn is_bypass(&self) -> bool {
        (self.ratio - 1.0).abs() < f32::EPSILON
    }
}

pub struct DynamicsCompressor {
    params: CompressorParams,
    sample_rate: u32,
    envelope: f32,
}

impl DynamicsCompressor {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            params: CompressorParams::default(),
            sample_rate,
            envelope: 0.0,
        }
    }

    pub fn params(&self) -> CompressorParams {
        self.params
    }

    pub fn set_params(&mut self, params: CompressorParams) {
        self.params = params;
    }

    fn time_coeff(&self, seconds: f32) -> f32 {
        if seconds <= 0.0 {
            return 0.0;
        }
        (-1.0 / (seconds * self.sample_rate as f32)).exp()
    }

    /// Static gain-computer curve: reduction in dB for a given input
    /// level in dB, with a quadratic soft knee around the threshold.
    pub fn gain_reduction_db(&self, level_db: f32) -> f32 {
        let p = &self.params;
        if p.ratio <= 1.0 {
            return 0.0;
        }
        let over = level_db - p.threshold_db;
        let slope = 1.0 - 1.0 / p.ratio;
        let half_knee = p.knee_db / 2.0;

        if over <= -half_knee {
            0.0
        } else if over < half_knee {
            let x = over + half_knee;
            slope * x * x / (2.0 * p.knee_db)
        } else {
            slope * over
        }
    }

    /// Processes one frame in place.
    pub fn process(&mut self, frame: &mut [f32]) {
        if self.params.is_bypass() {
            return;
        }

        let attack = self.time_coeff(self.params.attack_s);
        let release = self.time_coeff(self.params.release_s);

        for sample in frame.iter_mut() {
            let rectified = sample.abs();
            let coeff = if rectified > self.envelope {
                attack
            } else {
                release
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * rectified;

            let level_db = 20.0 * self.envelope.max(RMS_FLOOR).log10();
            let reduction_db = self.gain_reduction_db(level_db);
            let gain = 10f32.powf(-reduction_db / 20.0);
            *sample *= gain;
        }
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressor(params: CompressorParams) -> DynamicsCompressor {
        let mut c = DynamicsCompressor::new(48_000);
        c.set_params(params);
        c
    }

    #[test]
    fn bypass_passes_samples_through() {
        let mut c = compressor(CompressorParams::bypass());
        let original = vec![0.5, -0.8, 0.9, -0.1];
        let mut frame = original.clone();
        c.process(&mut frame);
        assert_eq!(frame, original);
    }

    #[test]
    fn no_reduction_well_below_threshold() {
        let c = compressor(CompressorParams {
            threshold_db: -24.0,
            ratio: 12.0,
            knee_db: 30.0,
            ..CompressorParams::default()
        });
        assert_eq!(c.gain_reduction_db(-60.0), 0.0);
    }

    #[test]
    fn full_slope_above_knee() {
        let c = compressor(CompressorParams {
            threshold_db: -24.0,
            ratio: 4.0,
            knee_db: 30.0,
            ..CompressorParams::default()
        });
        // 21 dB over threshold, past the knee: reduction = over * (1 - 1/ratio)
        let reduction = c.gain_reduction_db(-3.0);
        assert!((reduction - 21.0 * 0.75).abs() < 1e-4);
    }

    #[test]
    fn knee_is_continuous_and_monotonic() {
        let c = compressor(CompressorParams {
            threshold_db: -24.0,
            ratio: 12.0,
            knee_db: 30.0,
            ..CompressorParams::default()
        });
        let mut last = -1.0f32;
        for i in 0..200 {
            let level = -60.0 + i as f32 * 0.5;
            let r = c.gain_reduction_db(level);
            assert!(r >= last - 1e-5, "reduction decreased at {level} dB");
            last = r;
        }
    }

    #[test]
    fn loud_sustained_signal_is_attenuated() {
        let mut c = compressor(CompressorParams {
            threshold_db: -24.0,
            ratio: 12.0,
            attack_s: 0.001,
            release_s: 0.1,
            knee_db: 30.0,
        });
        // 0 dBFS square-ish signal, long enough for the envelope to settle.
        let mut frame = vec![1.0f32; 48_000 / 10];
        c.process(&mut frame);
        let tail = frame[frame.len() - 1];
        assert!(tail < 0.5, "expected heavy attenuation, got {tail}");
    }
}

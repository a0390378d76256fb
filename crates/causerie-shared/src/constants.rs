/// Maximum number of automatic reconnection attempts after an
/// unintentional transport close.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base delay for the exponential reconnection backoff, in milliseconds.
pub const RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// Upper bound on the reconnection backoff delay, in milliseconds.
pub const RECONNECT_MAX_DELAY_MS: u64 = 10_000;

/// Polling cadence of the local voice-activity detector, in milliseconds.
pub const LOCAL_VAD_INTERVAL_MS: u64 = 100;

/// Local voice activity is declared above this level (decibels).
pub const LOCAL_VAD_THRESHOLD_DB: f32 = -50.0;

/// Floor applied to RMS values before converting to decibels.
pub const RMS_FLOOR: f32 = 1e-5;

/// Statistics polling interval for downstream subscriptions, in milliseconds.
pub const REMOTE_STATS_INTERVAL_MS: u64 = 100;

/// Remote voice activity is declared above this linear audio energy.
pub const REMOTE_ENERGY_THRESHOLD: f64 = 1e-4;

/// Remote activity is cleared only after this long without qualifying
/// energy, to avoid flicker on short pauses. Milliseconds.
pub const REMOTE_ACTIVITY_HOLDOVER_MS: u64 = 1000;

/// How long a finished file-transfer record lingers before removal,
/// in milliseconds.
pub const TRANSFER_LINGER_MS: u64 = 5000;

/// Sample rate of the local audio processing graph.
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Window size of the analysis taps, in samples.
pub const ANALYSER_WINDOW: usize = 2048;

/// Smoothing constant applied by the analysis taps.
pub const ANALYSER_SMOOTHING: f32 = 0.8;

/// Fixed compressor knee width, in decibels.
pub const COMPRESSOR_KNEE_DB: f32 = 30.0;

/// Compressor defaults: threshold (dB), ratio, attack (s), release (s).
pub const DEFAULT_COMPRESSOR_THRESHOLD_DB: f32 = -24.0;
pub const DEFAULT_COMPRESSOR_RATIO: f32 = 12.0;
pub const DEFAULT_COMPRESSOR_ATTACK_S: f32 = 0.003;
pub const DEFAULT_COMPRESSOR_RELEASE_S: f32 = 0.25;

/// Bandwidth cap of the low simulcast layer, bits per second.
pub const SIMULCAST_LOW_MAX_BITRATE: u32 = 100_000;

/// Resolution divisor of the low simulcast layer.
pub const SIMULCAST_LOW_SCALE_DOWN: f64 = 2.0;

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while opening or reading from the capture device.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {name:?}")]
    DeviceNotFound { name: Option<String> },

    #[error("no candidate sampling rate supported by device")]
    NoSupportedRate,

    #[error("input queue overflow after {attempts} missed handoff attempts")]
    QueueOverflow { attempts: u32 },

    #[error("reconfiguration attempted while capture is running")]
    Busy,

    #[error("underlying audio driver error: {0}")]
    Driver(String),
}

/// Errors from FIR filter design or the decimation stage.
#[derive(Error, Debug)]
pub enum DownsampleError {
    #[error("reconfiguration attempted while downsampler is running")]
    Busy,

    #[error("decimation factor must be >= 1, got {0}")]
    InvalidDecimation(u32),

    #[error("processing decimation {dproc} is not a multiple of recording decimation {drec}")]
    NotMultiple { dproc: u32, drec: u32 },
}

/// Errors from STFT configuration.
#[derive(Error, Debug)]
pub enum SpectralError {
    #[error("reconfiguration attempted while spectrogram worker is running")]
    Busy,

    #[error("window length {window} exceeds FFT size {fft_size}")]
    WindowTooLarge { window: usize, fft_size: usize },

    #[error("overlap must be in [0, 1), got {0}")]
    InvalidOverlap(f64),
}

/// Errors from the Tone Searcher.
#[derive(Error, Debug)]
pub enum ToneSearchError {
    #[error("reconfiguration attempted while tone searcher is running")]
    Busy,

    /// Not a real error: the lookahead window is not yet available and the
    /// analysis step must be retried once more data arrives.
    #[error("insufficient lookahead, retry after more data arrives")]
    InsufficientLookahead,

    #[error("search frequency list must contain at least 10 entries, got {0}")]
    TooFewSearchFrequencies(usize),
}

/// Errors from the Sequence Validator.
#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("reconfiguration attempted while validator is running")]
    Busy,

    #[error("invalid FME rule parameters: {0}")]
    InvalidRules(String),
}

/// Errors from the Audio Preserver.
#[derive(Error, Debug)]
pub enum PreserverError {
    #[error("recordBuffer must be >= 0, got {0}")]
    NegativeBuffer(f64),

    #[error("recordLower ({lower}) must be <= recordUpper ({upper})")]
    LowerExceedsUpper { lower: f64, upper: f64 },

    #[error("recordBuffer ({buffer}) must be >= |recordLower| ({lower}) when recordLower < 0")]
    BufferTooSmall { buffer: f64, lower: f64 },
}

/// Errors from the Sequence Dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no sink registered")]
    NoSink,
}

/// Errors from configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration parsing error: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Top-level error umbrella composed at the `gateway` binary boundary.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Downsample(#[from] DownsampleError),

    #[error(transparent)]
    Spectral(#[from] SpectralError),

    #[error(transparent)]
    ToneSearch(#[from] ToneSearchError),

    #[error(transparent)]
    Validator(#[from] ValidatorError),

    #[error(transparent)]
    Preserver(#[from] PreserverError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: String, to: String },

    #[error("fatal error, cannot recover: {0}")]
    Fatal(String),

    #[error("transient error: {0}")]
    Transient(String),
}

/// How the supervisor should react to a given runtime error. Mirrors the
/// policy in spec.md §7: capture overflow and device failure are fatal to
/// their worker but never auto-stop the pipeline; that decision is left to
/// the host via `onRuntimeError`.
#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    Retry { max_attempts: u32, delay: Duration },
    Fatal,
    Ignore,
}

impl GatewayError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            GatewayError::Capture(CaptureError::DeviceNotFound { .. }) => RecoveryStrategy::Retry {
                max_attempts: 5,
                delay: Duration::from_secs(2),
            },
            GatewayError::Capture(CaptureError::QueueOverflow { .. }) => RecoveryStrategy::Fatal,
            GatewayError::ToneSearch(ToneSearchError::InsufficientLookahead) => {
                RecoveryStrategy::Ignore
            }
            GatewayError::Fatal(_) => RecoveryStrategy::Fatal,
            _ => RecoveryStrategy::Ignore,
        }
    }
}

//! Error types for configuration, frame sources and session lifecycle.
//!
//! Per-frame analysis never fails: an unusable frame simply yields no
//! pitch. Everything here happens around the analysis, not inside it.

use thiserror::Error;

/// Errors surfaced by the tuner core.
#[derive(Error, Debug)]
pub enum TunerError {
    /// A configuration value is out of its valid range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reference pitch must be a finite, positive frequency
    #[error("Invalid reference frequency: {0} Hz")]
    InvalidReference(f64),

    /// No audio input device is available on this host
    #[error("No input device available")]
    NoInputDevice,

    /// The platform refused access to the input device
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    /// The device offers no sample format we can consume
    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    /// Any other failure while building or running the input stream
    #[error("Audio capture error: {0}")]
    Capture(String),

    /// WAV decoding error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The analysis thread died before reporting back
    #[error("Analysis worker panicked")]
    WorkerPanicked,
}

/// Result alias for tuner operations
pub type Result<T> = std::result::Result<T, TunerError>;

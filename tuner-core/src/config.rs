//! Configuration for the tuner: the shared reference pitch, analysis
//! thresholds and capture framing, with JSON load/save.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunerError};
use crate::pitch::EstimatorSettings;
use crate::tuning::DEFAULT_A4_FREQUENCY;

/// Estimates must be strictly clearer than this to be mapped to a note.
pub const DEFAULT_CLARITY_THRESHOLD: f64 = 0.9;
/// Samples per analysis frame.
pub const DEFAULT_FRAME_SIZE: usize = 2048;

/// Shared handle to the A4 reference frequency.
///
/// Any number of readers may hold clones; every read is a single atomic
/// load of the f64 bit pattern, so a concurrent write is seen either
/// entirely or not at all.
#[derive(Debug, Clone)]
pub struct ReferencePitch(Arc<AtomicU64>);

impl Default for ReferencePitch {
    fn default() -> Self {
        Self(Arc::new(AtomicU64::new(DEFAULT_A4_FREQUENCY.to_bits())))
    }
}

impl ReferencePitch {
    pub fn new(a4: f64) -> Result<Self> {
        validate_reference(a4)?;
        Ok(Self(Arc::new(AtomicU64::new(a4.to_bits()))))
    }

    /// Snapshot of the current reference in Hz.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, a4: f64) -> Result<()> {
        validate_reference(a4)?;
        self.0.store(a4.to_bits(), Ordering::Release);
        Ok(())
    }

    /// Moves the reference by `delta` Hz and rounds to 0.1 Hz.
    ///
    /// Returns the new value. The adjustment is a single atomic update, so
    /// a concurrent `set` is never half-applied.
    pub fn nudge(&self, delta: f64) -> Result<f64> {
        let mut next = f64::NAN;
        let updated = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                next = ((f64::from_bits(bits) + delta) * 10.0).round() / 10.0;
                validate_reference(next).ok().map(|()| next.to_bits())
            });

        match updated {
            Ok(_) => Ok(next),
            Err(_) => Err(TunerError::InvalidReference(next)),
        }
    }
}

fn validate_reference(a4: f64) -> Result<()> {
    if a4.is_finite() && a4 > 0.0 {
        Ok(())
    } else {
        Err(TunerError::InvalidReference(a4))
    }
}

/// How incoming audio is cut into frames and queued.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Samples per analysis frame
    pub frame_size: usize,
    /// Samples between the starts of consecutive frames
    pub hop_size: usize,
    /// Frames buffered between the source and the analysis thread
    pub frame_queue: usize,
    /// Results buffered between the analysis thread and the consumer
    pub result_queue: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            hop_size: DEFAULT_FRAME_SIZE,
            frame_queue: 4,
            result_queue: 64,
        }
    }
}

/// Complete tuner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// A4 in Hz
    pub reference_frequency: f64,
    /// Clarity an estimate must exceed before it is mapped to a note
    pub clarity_threshold: f64,
    pub estimator: EstimatorSettings,
    pub capture: CaptureSettings,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            reference_frequency: DEFAULT_A4_FREQUENCY,
            clarity_threshold: DEFAULT_CLARITY_THRESHOLD,
            estimator: EstimatorSettings::default(),
            capture: CaptureSettings::default(),
        }
    }
}

impl TunerConfig {
    /// Loads and validates a configuration from a JSON file.
    ///
    /// Fields missing from the file take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        let config: TunerConfig = serde_json::from_str(&data)?;
        config.validate()?;
        log::debug!("loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_reference(self.reference_frequency)?;

        let unit = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(TunerError::InvalidConfig(format!("{name} must be within [0, 1], got {value}")))
            }
        };
        unit("clarity_threshold", self.clarity_threshold)?;
        unit("peak_threshold", self.estimator.peak_threshold)?;

        let estimator = &self.estimator;
        if !(estimator.silence_threshold >= 0.0) {
            return Err(TunerError::InvalidConfig(format!(
                "silence_threshold must not be negative, got {}",
                estimator.silence_threshold
            )));
        }
        if !(estimator.min_frequency > 0.0 && estimator.min_frequency < estimator.max_frequency)
            || !estimator.max_frequency.is_finite()
        {
            return Err(TunerError::InvalidConfig(format!(
                "frequency range {}..{} Hz is empty",
                estimator.min_frequency, estimator.max_frequency
            )));
        }

        let capture = &self.capture;
        if capture.frame_size < 3 {
            return Err(TunerError::InvalidConfig(format!(
                "frame_size must be at least 3, got {}",
                capture.frame_size
            )));
        }
        if capture.hop_size == 0 || capture.hop_size > capture.frame_size {
            return Err(TunerError::InvalidConfig(format!(
                "hop_size must be within 1..={}, got {}",
                capture.frame_size, capture.hop_size
            )));
        }
        if capture.frame_queue == 0 || capture.result_queue == 0 {
            return Err(TunerError::InvalidConfig("queue capacities must be non-zero".to_string()));
        }
        Ok(())
    }

    /// A fresh shared reference initialised from this config.
    pub fn reference(&self) -> Result<ReferencePitch> {
        ReferencePitch::new(self.reference_frequency)
    }
}

// tuner-core/src/lib.rs

//! The core logic for the tuner.
//! This crate is responsible for pitch estimation, mapping frequencies
//! to piano keys, and running the per-frame analysis loop. It is
//! completely headless and contains no display code.

pub mod analysis;
#[cfg(feature = "capture")]
pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod pitch;
pub mod session;
pub mod source;
pub mod tuning;

use serde::{Deserialize, Serialize};

pub use analysis::Analyzer;
pub use config::{CaptureSettings, ReferencePitch, TunerConfig};
pub use error::{Result, TunerError};
pub use pitch::{EstimatorSettings, PitchEstimate, PitchEstimator};
pub use session::{Session, SessionStats};
pub use source::{Frame, FrameSource, SignalSource};
pub use tuning::{NoteResult, PitchClass, TuningStatus, frequency_to_note};

/// Represents the result of a single audio analysis frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Index of the analysed frame within its session.
    pub frame_index: u64,
    /// The raw estimate, if the frame was pitched at all.
    pub estimate: Option<PitchEstimate>,
    /// The nearest note, if the estimate was clear enough and in range.
    pub note: Option<NoteResult>,
}

impl AnalysisResult {
    /// Whether this frame produced a note to display.
    pub fn is_pitched(&self) -> bool {
        self.note.is_some()
    }
}

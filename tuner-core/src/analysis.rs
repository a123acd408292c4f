//! # Analysis Pipeline
//!
//! One call per frame: estimate the pitch, gate it on clarity, and map
//! the survivors to the nearest piano key under the current reference.

use crate::AnalysisResult;
use crate::config::{ReferencePitch, TunerConfig};
use crate::pitch::PitchEstimator;
use crate::source::Frame;
use crate::tuning;

/// Runs the estimator and the note mapper over frames.
pub struct Analyzer {
    estimator: PitchEstimator,
    clarity_threshold: f64,
    reference: ReferencePitch,
}

impl Analyzer {
    pub fn new(config: &TunerConfig, reference: ReferencePitch) -> Self {
        Self {
            estimator: PitchEstimator::new(config.estimator),
            clarity_threshold: config.clarity_threshold,
            reference,
        }
    }

    pub fn reference(&self) -> &ReferencePitch {
        &self.reference
    }

    /// Performs a full analysis on a single frame of audio data.
    ///
    /// An estimate is only mapped to a note when its clarity is strictly
    /// above the threshold. The reference is read once, so a concurrent
    /// change applies from the next frame on.
    pub fn analyze(&mut self, frame: &Frame, sample_rate: u32) -> AnalysisResult {
        let estimate = self.estimator.estimate(&frame.samples, sample_rate);

        let note = estimate
            .filter(|e| e.clarity > self.clarity_threshold)
            .and_then(|e| tuning::frequency_to_note(e.frequency, self.reference.get()));

        if let (Some(e), None) = (estimate, note) {
            log::trace!(
                "frame {}: {:.2} Hz (clarity {:.3}) not mapped",
                frame.index,
                e.frequency,
                e.clarity
            );
        }

        AnalysisResult {
            frame_index: frame.index,
            estimate,
            note,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CLARITY_THRESHOLD;
    use crate::tuning::PitchClass;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn tone(freq: f64, index: u64) -> Frame {
        let samples = (0..2048)
            .map(|i| (0.6 * (2.0 * PI * freq * i as f64 / 44100.0).sin()) as f32)
            .collect();
        Frame { index, samples }
    }

    #[test]
    fn clean_tone_becomes_a_note() {
        let mut analyzer = Analyzer::new(&TunerConfig::default(), ReferencePitch::default());
        let result = analyzer.analyze(&tone(440.0, 7), 44100);

        assert_eq!(result.frame_index, 7);
        assert!(result.is_pitched());
        let note = result.note.unwrap();
        assert_eq!(note.name, PitchClass::A);
        assert_eq!(note.octave, 4);
        assert_abs_diff_eq!(note.cents, 0.0, epsilon = 5.0);
    }

    #[test]
    fn silence_has_no_estimate() {
        let mut analyzer = Analyzer::new(&TunerConfig::default(), ReferencePitch::default());
        let result = analyzer.analyze(&Frame { index: 0, samples: vec![0.0; 2048] }, 44100);
        assert_eq!(result.estimate, None);
        assert_eq!(result.note, None);
        assert!(!result.is_pitched());
    }

    #[test]
    fn constant_frame_is_not_a_note() {
        let mut analyzer = Analyzer::new(&TunerConfig::default(), ReferencePitch::default());
        let result = analyzer.analyze(&Frame { index: 0, samples: vec![0.5; 2048] }, 44100);
        assert_eq!(result.estimate, None);
        assert!(!result.is_pitched());
    }

    #[test]
    fn clarity_gate_is_strict() {
        let config = TunerConfig { clarity_threshold: 1.0, ..Default::default() };
        let mut analyzer = Analyzer::new(&config, ReferencePitch::default());
        let result = analyzer.analyze(&tone(440.0, 0), 44100);
        assert!(result.estimate.is_some());
        assert_eq!(result.note, None);
    }

    #[test]
    fn reference_changes_apply_to_the_next_frame() {
        let reference = ReferencePitch::default();
        let mut analyzer = Analyzer::new(&TunerConfig::default(), reference.clone());

        let before = analyzer.analyze(&tone(440.0, 0), 44100).note.unwrap();
        reference.set(430.0).unwrap();
        let after = analyzer.analyze(&tone(440.0, 1), 44100).note.unwrap();

        assert_eq!(before.label(), after.label());
        assert_abs_diff_eq!(after.target_frequency, 430.0, epsilon = 1e-9);
        assert!(after.cents > 35.0);
    }

    #[test]
    fn estimate_is_reported_even_when_unmapped() {
        // With A4 at 60 Hz, 2 kHz maps to key 110, past C8.
        let reference = ReferencePitch::new(60.0).unwrap();
        let mut analyzer = Analyzer::new(&TunerConfig::default(), reference);
        let result = analyzer.analyze(&tone(2000.0, 3), 44100);

        assert_eq!(result.frame_index, 3);
        let estimate = result.estimate.expect("a clean tone is estimated");
        assert!(estimate.clarity > DEFAULT_CLARITY_THRESHOLD);
        assert_abs_diff_eq!(estimate.frequency, 2000.0, epsilon = 10.0);
        assert_eq!(result.note, None);
        assert!(!result.is_pitched());
    }
}

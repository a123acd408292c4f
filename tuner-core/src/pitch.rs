//! # Pitch Detection Module
//!
//! This module implements the pitch estimator used by the tuner. It is a
//! normalized square difference (NSDF, McLeod-style) detector with a
//! peak-picking rule that prefers the lowest lag that is "good enough",
//! which keeps it from locking onto a harmonic.
//!
//! ## Features
//! - RMS silence gate
//! - Search range limited to the piano (A0 to beyond C8)
//! - FFT-backed normalized autocorrelation
//! - Relative-threshold peak selection against octave errors
//! - Parabolic interpolation for sub-sample accuracy

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::fft::Autocorrelator;

/// Frames quieter than this RMS level are treated as silence.
pub const DEFAULT_SILENCE_THRESHOLD: f64 = 0.01;
/// A peak must reach this fraction of the highest peak to be selected.
pub const DEFAULT_PEAK_THRESHOLD: f64 = 0.93;
/// Lowest frequency searched (just below A0).
pub const DEFAULT_MIN_FREQUENCY: f64 = 27.0;
/// Highest frequency searched (headroom above C8).
pub const DEFAULT_MAX_FREQUENCY: f64 = 4200.0;

/// Relative error bound of the FFT autocorrelation, as a fraction of the
/// frame energy.
const ROUNDOFF: f64 = 1e-10;

/// A fundamental-frequency estimate for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// Estimated fundamental in Hz
    pub frequency: f64,
    /// Height of the selected NSDF peak, 0.0 to 1.0
    pub clarity: f64,
}

/// Tunables of the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    /// Minimum RMS level for a frame to be analysed
    pub silence_threshold: f64,
    /// Relative peak threshold (fraction of the global maximum peak)
    pub peak_threshold: f64,
    /// Lowest detectable frequency in Hz, sets the largest lag
    pub min_frequency: f64,
    /// Highest detectable frequency in Hz, sets the smallest lag
    pub max_frequency: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            peak_threshold: DEFAULT_PEAK_THRESHOLD,
            min_frequency: DEFAULT_MIN_FREQUENCY,
            max_frequency: DEFAULT_MAX_FREQUENCY,
        }
    }
}

/// A strict local maximum of the NSDF curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub lag: usize,
    pub value: f64,
}

/// Estimates the fundamental frequency of mono sample buffers.
///
/// The estimator keeps its work buffers between calls; it holds no state
/// that influences the result of the next frame.
pub struct PitchEstimator {
    settings: EstimatorSettings,
    autocorrelator: Autocorrelator,
    acf: Vec<f64>,
    energy: Vec<f64>,
    nsdf: Vec<f64>,
    slack: Vec<f64>,
}

impl Default for PitchEstimator {
    fn default() -> Self {
        Self::new(EstimatorSettings::default())
    }
}

impl PitchEstimator {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self {
            settings,
            autocorrelator: Autocorrelator::new(),
            acf: Vec::new(),
            energy: Vec::new(),
            nsdf: Vec::new(),
            slack: Vec::new(),
        }
    }

    pub fn settings(&self) -> &EstimatorSettings {
        &self.settings
    }

    /// Estimates the pitch of one frame.
    ///
    /// 1. Silence gate on the RMS level
    /// 2. NSDF over the lag range of the piano
    /// 3. Strict local maxima, first one within `peak_threshold` of the best
    /// 4. Parabolic refinement of the selected lag
    ///
    /// # Arguments
    /// * `buffer` - Mono time-domain samples, roughly in [-1, 1]
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Returns
    /// * `Some(estimate)` - Frequency in Hz and clarity of the chosen peak
    /// * `None` - Silence, no qualifying peak, or a degenerate input
    pub fn estimate(&mut self, buffer: &[f32], sample_rate: u32) -> Option<PitchEstimate> {
        if buffer.is_empty() || sample_rate == 0 {
            return None;
        }

        // --- Noise Gate ---
        let level = rms(buffer);
        if level.is_nan() || level < self.settings.silence_threshold {
            log::trace!("frame rejected: rms {:.5} below gate", level);
            return None;
        }

        let Some(lags) = lag_range(sample_rate, &self.settings, buffer.len()) else {
            log::trace!("frame rejected: empty lag range at {} Hz", sample_rate);
            return None;
        };

        self.compute_nsdf(buffer, *lags.end());

        let peaks = find_peaks_within(&self.nsdf, &self.slack, lags);
        let Some(selected) = select_peak(&peaks, self.settings.peak_threshold) else {
            log::trace!("frame rejected: no qualifying peak among {}", peaks.len());
            return None;
        };

        // --- Parabolic interpolation; peaks are interior so both neighbours exist ---
        let tau = selected.lag;
        let refined_lag = match parabolic_offset(self.nsdf[tau - 1], self.nsdf[tau], self.nsdf[tau + 1]) {
            Some(offset) => tau as f64 + offset,
            None => tau as f64,
        };
        if refined_lag <= 0.0 {
            return None;
        }

        let frequency = sample_rate as f64 / refined_lag;
        if !frequency.is_finite() {
            return None;
        }

        Some(PitchEstimate {
            frequency,
            clarity: selected.value.clamp(0.0, 1.0),
        })
    }

    /// Fills `self.nsdf[τ] = 2·r(τ) / m(τ)` for τ in `0..=max_lag`.
    ///
    /// m(τ) = Σ x[i]² + x[i+τ]² over the overlap, taken from prefix sums
    /// of squares; a zero m gives a zero NSDF value. `self.slack[τ]` is the
    /// roundoff bound of `self.nsdf[τ]`.
    fn compute_nsdf(&mut self, buffer: &[f32], max_lag: usize) {
        let n = buffer.len();
        self.autocorrelator.autocorrelate(buffer, max_lag, &mut self.acf);

        self.energy.clear();
        self.energy.push(0.0);
        let mut running = 0.0;
        for &sample in buffer {
            running += sample as f64 * sample as f64;
            self.energy.push(running);
        }

        let total = self.energy[n];
        self.nsdf.clear();
        self.slack.clear();
        for tau in 0..=max_lag {
            let m = self.energy[n - tau] + (total - self.energy[tau]);
            if m > 0.0 {
                self.nsdf.push(2.0 * self.acf[tau] / m);
                self.slack.push(2.0 * ROUNDOFF * total / m);
            } else {
                self.nsdf.push(0.0);
                self.slack.push(0.0);
            }
        }
    }

    #[cfg(test)]
    fn curve(&self) -> &[f64] {
        &self.nsdf
    }
}

/// Root-mean-square level of a buffer (0.0 for an empty one).
pub fn rms(buffer: &[f32]) -> f64 {
    if buffer.is_empty() {
        return 0.0;
    }
    let sum: f64 = buffer.iter().map(|&s| s as f64 * s as f64).sum();
    (sum / buffer.len() as f64).sqrt()
}

/// Candidate lags `[floor(sr / max_f), ceil(sr / min_f)]`, clipped to the
/// buffer.
///
/// Returns `None` when fewer than three lags remain, since a peak needs
/// both neighbours inside the range.
pub fn lag_range(
    sample_rate: u32,
    settings: &EstimatorSettings,
    len: usize,
) -> Option<RangeInclusive<usize>> {
    if sample_rate == 0 || len < 3 {
        return None;
    }
    if !(settings.min_frequency > 0.0 && settings.max_frequency > settings.min_frequency) {
        return None;
    }

    let sr = sample_rate as f64;
    let min_lag = (sr / settings.max_frequency).floor() as usize;
    let max_lag = ((sr / settings.min_frequency).ceil() as usize).min(len - 1);

    if max_lag < min_lag + 2 {
        return None;
    }
    Some(min_lag..=max_lag)
}

/// Collects every strict local maximum strictly inside `lags`, in
/// ascending lag order.
///
/// Equal neighbours do not make a peak; the range boundaries are never
/// peaks.
pub fn find_peaks(nsdf: &[f64], lags: RangeInclusive<usize>) -> Vec<Peak> {
    find_peaks_within(nsdf, &[], lags)
}

/// Like [`find_peaks`], but a lag only rises above a neighbour when the
/// difference exceeds the larger of their `slack` values. Lags without a
/// slack entry compare exactly.
///
/// The FFT autocorrelation carries a tiny ripple; on a flat curve (a DC
/// frame has NSDF 1.0 at every lag) that ripple would otherwise turn
/// into peaks.
pub fn find_peaks_within(nsdf: &[f64], slack: &[f64], lags: RangeInclusive<usize>) -> Vec<Peak> {
    let start = *lags.start();
    let end = (*lags.end()).min(nsdf.len().saturating_sub(1));
    let slack_at = |tau: usize| slack.get(tau).copied().unwrap_or(0.0);
    let rises = |tau: usize, other: usize| nsdf[tau] - nsdf[other] > slack_at(tau).max(slack_at(other));

    (start + 1..end)
        .filter(|&tau| rises(tau, tau - 1) && rises(tau, tau + 1))
        .map(|tau| Peak {
            lag: tau,
            value: nsdf[tau],
        })
        .collect()
}

/// Picks the first peak reaching `threshold` times the highest peak.
///
/// Peaks are expected in ascending lag order. Without any positive peak
/// nothing qualifies.
pub fn select_peak(peaks: &[Peak], threshold: f64) -> Option<Peak> {
    let global_max = peaks.iter().map(|p| p.value).fold(0.0, f64::max);
    if global_max <= 0.0 {
        return None;
    }
    let cutoff = threshold * global_max;
    peaks.iter().copied().find(|p| p.value >= cutoff)
}

/// Offset of the vertex of the parabola through (-1, s0), (0, s1), (1, s2).
///
/// `None` when the three points are collinear.
pub fn parabolic_offset(s0: f64, s1: f64, s2: f64) -> Option<f64> {
    let denominator = s0 - 2.0 * s1 + s2;
    if denominator == 0.0 {
        return None;
    }
    Some((s0 - s2) / (2.0 * denominator))
}

//! # Fast Fourier Transform (FFT) Module
//!
//! This module provides the FFT-backed autocorrelation used by the pitch
//! estimator. Computing r(τ) for every candidate lag directly costs
//! O(n·τ) per frame; going through the spectrum (Wiener–Khinchin) brings
//! that down to O(n log n), which matters in a per-frame loop.
//!
//! ## Features
//! - High-performance FFT using RustFFT
//! - Zero padding so the circular correlation equals the linear one
//! - Plans and scratch buffers reused across frames

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// Forward and inverse plans for one padded length.
struct Plans {
    len: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

/// Computes linear autocorrelations of real signals through the FFT.
///
/// Plans are kept for the last padded length and the complex work
/// buffers are reused, so a steady stream of equal-length frames does not
/// re-plan or allocate after the first one.
pub struct Autocorrelator {
    plans: Option<Plans>,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl Default for Autocorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl Autocorrelator {
    pub fn new() -> Self {
        Self {
            plans: None,
            buffer: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Fills `out` with r(τ) = Σ x[i]·x[i+τ] for τ in `0..=max_lag`.
    ///
    /// Lags at or beyond the signal length have no overlapping samples
    /// and come out as zero.
    ///
    /// # Arguments
    /// * `signal` - Input audio signal
    /// * `max_lag` - Largest lag to report
    /// * `out` - Destination, resized to `max_lag + 1`
    pub fn autocorrelate(&mut self, signal: &[f32], max_lag: usize, out: &mut Vec<f64>) {
        out.clear();
        out.resize(max_lag + 1, 0.0);

        let n = signal.len();
        if n == 0 {
            return;
        }

        // N >= n + max_lag keeps wrapped products out of every reported lag.
        let padded_len = (n + max_lag).next_power_of_two();
        let (forward, inverse) = self.plans_for(padded_len);

        self.buffer.clear();
        self.buffer
            .extend(signal.iter().map(|&s| Complex { re: s as f64, im: 0.0 }));
        self.buffer.resize(padded_len, Complex { re: 0.0, im: 0.0 });

        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        if self.scratch.len() < scratch_len {
            self.scratch.resize(scratch_len, Complex { re: 0.0, im: 0.0 });
        }

        let forward_scratch = forward.get_inplace_scratch_len();
        forward.process_with_scratch(&mut self.buffer, &mut self.scratch[..forward_scratch]);
        for bin in self.buffer.iter_mut() {
            *bin = Complex { re: bin.norm_sqr(), im: 0.0 };
        }
        let inverse_scratch = inverse.get_inplace_scratch_len();
        inverse.process_with_scratch(&mut self.buffer, &mut self.scratch[..inverse_scratch]);

        // RustFFT leaves the inverse unnormalized.
        let scale = 1.0 / padded_len as f64;
        let reported = max_lag.min(n - 1);
        for (tau, value) in out.iter_mut().enumerate().take(reported + 1) {
            *value = self.buffer[tau].re * scale;
        }
    }

    fn plans_for(&mut self, len: usize) -> (Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>) {
        let plans = match self.plans.take() {
            Some(plans) if plans.len == len => plans,
            _ => {
                let mut planner = FftPlanner::new();
                Plans {
                    len,
                    forward: planner.plan_fft_forward(len),
                    inverse: planner.plan_fft_inverse(len),
                }
            }
        };
        let pair = (Arc::clone(&plans.forward), Arc::clone(&plans.inverse));
        self.plans = Some(plans);
        pair
    }
}

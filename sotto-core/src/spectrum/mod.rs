//! Per-frame magnitude spectrum via a precomputed rustfft plan.
//!
//! ## Algorithm
//!
//! 1. Copy up to `window_size` real samples into the complex input buffer
//!    (imaginary part zero); zero the tail slots for short frames.
//! 2. Execute the forward plan in place. The plan is built once at
//!    construction and reused for every frame — planning per frame is far too
//!    slow for a real-time path.
//! 3. magnitude[i] = sqrt(re² + im²) for the first `window_size / 2` bins
//!    (the non-redundant half for real input).
//! 4. Track the session-wide peak over all bins (display scaling) and the
//!    loudness metric over bins ≥ `bin_skip`, so DC and low-frequency rumble
//!    never drive the speech decision.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{Result, SottoError};

/// One analyzed frame: the half-spectrum plus its scalar summaries.
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    /// Non-negative magnitudes; index 0 is the DC bin, indices increase with
    /// frequency. Length is always `window_size / 2`.
    pub magnitudes: Vec<f64>,
    /// Running maximum over all bins since the session started. Monotonic —
    /// used only to scale visualizations, never for gating.
    pub peak: f64,
    /// Maximum magnitude over bins at or above the skip offset. Drives the
    /// speech gate.
    pub loudness: f64,
}

/// Fixed-window forward transform with reusable input and scratch buffers.
///
/// The plan and its buffers are owned exclusively by this instance for the
/// session's lifetime; everything is released when the analyzer drops.
pub struct SpectrumAnalyzer {
    plan: Arc<dyn Fft<f64>>,
    input: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    window_size: usize,
    bin_skip: usize,
    peak: f64,
}

impl SpectrumAnalyzer {
    /// Build the transform plan for a fixed window.
    ///
    /// # Errors
    /// Returns `SottoError::SpectrumPlan` for a zero or odd `window_size` —
    /// the half-spectrum contract requires an even, non-empty window. There
    /// is no degraded mode; the pipeline cannot run without the plan.
    pub fn new(window_size: usize, bin_skip: usize) -> Result<Self> {
        if window_size == 0 || window_size % 2 != 0 {
            return Err(SottoError::SpectrumPlan(window_size));
        }

        let mut planner = FftPlanner::<f64>::new();
        let plan = planner.plan_fft_forward(window_size);
        let scratch = vec![Complex::new(0.0, 0.0); plan.get_inplace_scratch_len()];

        Ok(Self {
            plan,
            input: vec![Complex::new(0.0, 0.0); window_size],
            scratch,
            window_size,
            bin_skip,
            peak: 0.0,
        })
    }

    /// Analyze one frame of mono samples.
    ///
    /// Frames longer than the window are truncated; shorter frames populate
    /// only the leading slots, the remainder is treated as silence. An empty
    /// frame is a no-op and returns `None`.
    pub fn analyze(&mut self, samples: &[f32]) -> Option<SpectrumFrame> {
        if samples.is_empty() {
            return None;
        }

        let n = samples.len().min(self.window_size);
        for (slot, sample) in self.input[..n].iter_mut().zip(samples) {
            *slot = Complex::new(f64::from(*sample), 0.0);
        }
        for slot in self.input[n..].iter_mut() {
            *slot = Complex::new(0.0, 0.0);
        }

        self.plan.process_with_scratch(&mut self.input, &mut self.scratch);

        let half = self.window_size / 2;
        let mut magnitudes = Vec::with_capacity(half);
        let mut loudness = 0.0f64;
        for (i, bin) in self.input[..half].iter().enumerate() {
            let magnitude = (bin.re * bin.re + bin.im * bin.im).sqrt();
            if magnitude > self.peak {
                self.peak = magnitude;
            }
            if i >= self.bin_skip && magnitude > loudness {
                loudness = magnitude;
            }
            magnitudes.push(magnitude);
        }

        Some(SpectrumFrame {
            magnitudes,
            peak: self.peak,
            loudness,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Session-wide display peak observed so far.
    pub fn peak(&self) -> f64 {
        self.peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const WINDOW: usize = 1024;
    const SKIP: usize = 10;

    fn analyzer() -> SpectrumAnalyzer {
        SpectrumAnalyzer::new(WINDOW, SKIP).unwrap()
    }

    /// Unit-amplitude sinusoid landing exactly on `bin` (integer periods per
    /// window, so no spectral leakage).
    fn tone(bin: usize, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * bin as f64 * i as f64 / WINDOW as f64;
                phase.sin() as f32
            })
            .collect()
    }

    #[test]
    fn rejects_zero_and_odd_window_sizes() {
        assert!(SpectrumAnalyzer::new(0, SKIP).is_err());
        assert!(SpectrumAnalyzer::new(1023, SKIP).is_err());
        assert!(SpectrumAnalyzer::new(1024, SKIP).is_ok());
    }

    #[test]
    fn empty_frame_is_a_noop() {
        let mut a = analyzer();
        assert!(a.analyze(&[]).is_none());
        assert_eq!(a.peak(), 0.0);
    }

    #[test]
    fn spectrum_length_is_half_window_for_any_input_length() {
        let mut a = analyzer();
        for len in [1, 100, WINDOW, WINDOW + 500] {
            let frame = a.analyze(&vec![0.25f32; len]).unwrap();
            assert_eq!(frame.magnitudes.len(), WINDOW / 2, "input len={len}");
        }
    }

    #[test]
    fn bin_50_tone_has_loudness_half_window() {
        let mut a = analyzer();
        let frame = a.analyze(&tone(50, WINDOW)).unwrap();

        // |X[k]| for a unit sine on an exact bin is N/2.
        assert_relative_eq!(frame.loudness, 512.0, max_relative = 1e-3);
        assert_relative_eq!(frame.magnitudes[50], 512.0, max_relative = 1e-3);

        // Everything away from the tone bin is numerically zero.
        assert_abs_diff_eq!(frame.magnitudes[200], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn dc_is_excluded_from_loudness_but_not_from_peak() {
        let mut a = analyzer();
        // Constant signal: all energy in the DC bin.
        let frame = a.analyze(&vec![1.0f32; WINDOW]).unwrap();

        assert_relative_eq!(frame.magnitudes[0], WINDOW as f64, max_relative = 1e-6);
        assert_relative_eq!(frame.peak, WINDOW as f64, max_relative = 1e-6);
        assert_abs_diff_eq!(frame.loudness, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn peak_is_monotonic_across_frames() {
        let mut a = analyzer();
        let loud = a.analyze(&tone(50, WINDOW)).unwrap();
        let quiet = a.analyze(&vec![0.0f32; WINDOW]).unwrap();

        assert_relative_eq!(quiet.peak, loud.peak, max_relative = 1e-9);
        assert_abs_diff_eq!(quiet.loudness, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn short_frame_tail_is_treated_as_silence() {
        let mut a = analyzer();
        // Feed a full loud frame first so stale input would be detectable.
        a.analyze(&tone(50, WINDOW)).unwrap();

        let frame = a.analyze(&[0.0f32; 4]).unwrap();
        assert_abs_diff_eq!(frame.loudness, 0.0, epsilon = 1e-9);
    }
}

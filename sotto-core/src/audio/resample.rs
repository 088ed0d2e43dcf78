//! Audio sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! `cpal` captures audio at the device's native rate (commonly 48 kHz).
//! The pipeline runs at a fixed 16 kHz mono f32. `RateConverter` bridges
//! that gap on the non-RT pipeline thread, where allocation is allowed.
//!
//! When capture rate == pipeline rate, `RateConverter` is a passthrough —
//! no rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, SottoError};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when capture rate == pipeline rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input blocks between calls.
    pending: Vec<f32>,
    /// Input samples rubato expects per process call.
    block: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter from `capture_rate` to `target_rate`, fed in
    /// blocks of up to `block` input samples.
    ///
    /// # Errors
    /// Returns `SottoError::AudioDevice` if rubato fails to initialise.
    pub fn new(capture_rate: u32, target_rate: u32, block: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                block,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            block,
            1, // mono
        )
        .map_err(|e| SottoError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(capture_rate, target_rate, block, max_out, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            block,
            output_buf,
        })
    }

    /// Feed incoming samples, returning converted output (may be empty).
    ///
    /// Input accumulates internally until a full rubato block is available;
    /// any remainder is kept for the next call. In passthrough mode the
    /// input is returned directly.
    pub fn convert(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= self.block {
            let input = &self.pending[..self.block];

            match resampler.process_into_buffer(&[input], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    out.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.pending.drain(..self.block);
        }

        out
    }

    /// Returns `true` when capture rate == pipeline rate.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_returns_input_unchanged() {
        let mut rc = RateConverter::new(16_000, 16_000, 1024).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..512).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.convert(&samples), samples);
    }

    #[test]
    fn converts_48k_to_16k_at_one_third_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 1024).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.convert(&vec![0.0f32; 1024]);
        assert!(!out.is_empty(), "expected non-empty output");
        let expected = 1024 / 3;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 12,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn partial_block_is_held_until_complete() {
        let mut rc = RateConverter::new(48_000, 16_000, 1024).unwrap();
        assert!(rc.convert(&vec![0.0f32; 600]).is_empty());
        // Second push completes the block.
        assert!(!rc.convert(&vec![0.0f32; 600]).is_empty());
    }
}

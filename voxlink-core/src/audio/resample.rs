//! Sample-rate conversion with a rubato `FastFixedIn` resampler.
//!
//! Devices capture at their native rate (commonly 44.1 or 48 kHz); the
//! session runs at `sampleRate` (16 kHz by default). When the rates match
//! `RateConverter` is a passthrough and no rubato state is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{info, warn};

use crate::error::{Result, VoxError};

/// Converts mono f32 audio between two fixed rates.
pub struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    /// Partial input carried between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// `chunk_size` is the input frame count per rubato call.
    ///
    /// # Errors
    /// Returns `VoxError::InvalidConfig` for zero rates and
    /// `VoxError::AudioDevice` if rubato fails to initialise.
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if capture_rate == 0 || target_rate == 0 {
            return Err(VoxError::InvalidConfig(format!(
                "sample rates must be positive (capture {capture_rate}, target {target_rate})"
            )));
        }
        let chunk_size = chunk_size.max(1);
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = f64::from(target_rate) / f64::from(capture_rate);
        let resampler =
            FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
                .map_err(|e| VoxError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        info!(capture_rate, target_rate, chunk_size, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
        })
    }

    /// Resample `samples`; output may be empty until a full chunk accumulates.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => warn!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }
        result
    }

    /// Resample whatever partial chunk remains, zero-padded. Used at end of
    /// stream so the tail of a file is not lost.
    pub fn flush(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.input_buf.is_empty() {
            return std::mem::take(&mut self.input_buf);
        }
        let pending = self.input_buf.len();
        let pad = self.chunk_size - pending;
        let out = self.process(&vec![0.0; pad]);
        // Keep only the share of output that corresponds to real input.
        let keep = (out.len() * pending).div_ceil(self.chunk_size);
        out[..keep.min(out.len())].to_vec()
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

//! Energy-based frame classifier.
//!
//! ## Algorithm
//!
//! 1. Compute RMS of the incoming frame.
//! 2. Map it linearly onto [0, 1] against `reference_rms` (RMS at or above
//!    the reference scores 1.0).
//!
//! Hangover and onset filtering live in the segmenter, so this classifier is
//! stateless apart from its loaded flag.

use super::FrameClassifier;
use crate::error::{Result, VoxError};

/// A simple RMS-energy speech classifier. Needs no model file.
#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    /// RMS level that maps to a score of 1.0.
    /// Typical range: 0.02–0.08 for a desk microphone.
    reference_rms: f32,
    loaded: bool,
}

impl EnergyClassifier {
    /// Create a new `EnergyClassifier`.
    ///
    /// With the default thresholds (0.5 / 0.35) and `reference_rms = 0.04`,
    /// speech starts above RMS 0.02 and ends below RMS 0.014.
    pub fn new(reference_rms: f32) -> Self {
        Self {
            reference_rms: reference_rms.max(f32::EPSILON),
            loaded: false,
        }
    }

    /// Compute the root-mean-square of a sample slice.
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new(0.04)
    }
}

impl FrameClassifier for EnergyClassifier {
    fn load(&mut self) -> Result<()> {
        self.loaded = true;
        Ok(())
    }

    fn score(&mut self, frame: &[f32]) -> Result<f32> {
        if !self.loaded {
            return Err(VoxError::VadRuntime("energy classifier not loaded".into()));
        }
        Ok((Self::rms(frame) / self.reference_rms).clamp(0.0, 1.0))
    }

    fn dispose(&mut self) {
        self.loaded = false;
    }
}

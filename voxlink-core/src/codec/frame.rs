//! Typed audio frames exchanged between capture, VAD, transport and playback.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{
    base64_decode, base64_encode, float_to_pcm16, pack_pcm16, pcm16_to_float, unpack_pcm16,
};
use crate::error::Result;

/// An immutable block of mono PCM16 samples with its sequence number.
///
/// Samples sit behind an `Arc` so a frame can be buffered for pre-speech
/// padding and handed to the transport without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioFrame {
    seq: u64,
    sample_rate: u32,
    samples: Arc<[i16]>,
}

impl AudioFrame {
    pub fn new(seq: u64, sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            seq,
            sample_rate,
            samples: samples.into(),
        }
    }

    /// Quantise float capture samples into a frame.
    pub fn from_float(seq: u64, sample_rate: u32, samples: &[f32]) -> Self {
        let pcm: Vec<i16> = samples.iter().copied().map(float_to_pcm16).collect();
        Self::new(seq, sample_rate, pcm)
    }

    /// Rebuild a frame received from the wire.
    ///
    /// # Errors
    /// Returns `VoxError::Codec` for malformed payloads.
    pub fn from_wire(seq: u64, sample_rate: u32, data: &WireSample) -> Result<Self> {
        Ok(Self::new(seq, sample_rate, data.to_pcm16()?))
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }

    pub fn to_float(&self) -> Vec<f32> {
        self.samples.iter().copied().map(pcm16_to_float).collect()
    }

    pub fn to_wire(&self) -> WireSample {
        WireSample::from_pcm16(&self.samples)
    }
}

impl fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioFrame")
            .field("seq", &self.seq)
            .field("sample_rate", &self.sample_rate)
            .field("len", &self.samples.len())
            .finish()
    }
}

/// Base64 text of little-endian PCM16 bytes, used only at the transport edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireSample(String);

impl WireSample {
    pub fn from_pcm16(samples: &[i16]) -> Self {
        Self(base64_encode(&pack_pcm16(samples)))
    }

    /// Wrap text received from a peer. No validation happens until decode.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// # Errors
    /// Returns `VoxError::Codec` on invalid base64 or an odd byte count.
    pub fn to_pcm16(&self) -> Result<Vec<i16>> {
        unpack_pcm16(&base64_decode(&self.0)?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

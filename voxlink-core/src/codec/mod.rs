//! PCM16 sample codec.
//!
//! Three representations of the same audio:
//!
//! ```text
//! f32 in [-1, 1]  ⇄  i16 (PCM16)  ⇄  base64 text of little-endian bytes
//! ```
//!
//! Scaling is asymmetric: negative samples use 32768, non-negative samples
//! use 32767, so `+1.0` maps to `i16::MAX` and `-1.0` to `i16::MIN` without
//! overflow. Every function here is pure and allocates its own output, so the
//! codec can be called from the capture worker, the session driver and any
//! playback path at the same time.

pub mod frame;

pub use frame::{AudioFrame, WireSample};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::{Result, VoxError};

const NEG_SCALE: f32 = 32768.0;
const POS_SCALE: f32 = 32767.0;

/// Largest per-sample error introduced by a float → PCM16 → float round trip.
pub const QUANTIZATION_STEP: f32 = 1.0 / POS_SCALE;

/// Convert one float sample to PCM16. NaN becomes silence.
pub fn float_to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * NEG_SCALE).round() as i16
    } else {
        (s * POS_SCALE).round() as i16
    }
}

/// Convert one PCM16 sample back to float.
pub fn pcm16_to_float(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / NEG_SCALE
    } else {
        sample as f32 / POS_SCALE
    }
}

/// Pack PCM16 samples as little-endian bytes.
pub fn pack_pcm16(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Reinterpret little-endian bytes as PCM16 samples.
///
/// # Errors
/// Returns `VoxError::Codec` when the byte count is odd.
pub fn unpack_pcm16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(VoxError::Codec(format!(
            "odd PCM16 payload length: {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode float samples into the text-safe wire representation.
pub fn encode_to_wire(samples: &[f32]) -> WireSample {
    let pcm: Vec<i16> = samples.iter().copied().map(float_to_pcm16).collect();
    WireSample::from_pcm16(&pcm)
}

/// Decode the wire representation back to float samples.
///
/// # Errors
/// Returns `VoxError::Codec` on invalid base64 or an odd byte count.
pub fn decode_from_wire(data: &WireSample) -> Result<Vec<f32>> {
    Ok(data
        .to_pcm16()?
        .into_iter()
        .map(pcm16_to_float)
        .collect())
}

pub(crate) fn base64_encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub(crate) fn base64_decode(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text)
        .map_err(|e| VoxError::Codec(format!("invalid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn extremes_map_to_full_scale() {
        assert_eq!(float_to_pcm16(1.0), i16::MAX);
        assert_eq!(float_to_pcm16(-1.0), i16::MIN);
        assert_eq!(float_to_pcm16(0.0), 0);
    }

    #[test]
    fn out_of_range_and_nan_are_clamped() {
        assert_eq!(float_to_pcm16(3.5), i16::MAX);
        assert_eq!(float_to_pcm16(-12.0), i16::MIN);
        assert_eq!(float_to_pcm16(f32::NAN), 0);
        assert_eq!(float_to_pcm16(f32::INFINITY), i16::MAX);
        assert_eq!(float_to_pcm16(f32::NEG_INFINITY), i16::MIN);
    }

    #[test]
    fn pcm16_scaling_is_asymmetric() {
        assert_abs_diff_eq!(pcm16_to_float(i16::MAX), 1.0);
        assert_abs_diff_eq!(pcm16_to_float(i16::MIN), -1.0);
        assert_abs_diff_eq!(pcm16_to_float(16384), 16384.0 / 32767.0);
        assert_abs_diff_eq!(pcm16_to_float(-16384), -0.5);
    }

    #[test]
    fn packs_little_endian() {
        let bytes = pack_pcm16(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
        assert_eq!(unpack_pcm16(&bytes).unwrap(), vec![1, -2, 0x1234]);
    }

    #[test]
    fn odd_payload_is_rejected() {
        assert!(matches!(unpack_pcm16(&[1, 2, 3]), Err(VoxError::Codec(_))));
    }

    #[test]
    fn float_round_trip_within_one_step() {
        let samples: Vec<f32> = (0..2001).map(|i| (i as f32 - 1000.0) / 1000.0).collect();
        let decoded = decode_from_wire(&encode_to_wire(&samples)).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (orig, back) in samples.iter().zip(&decoded) {
            assert!(
                (orig - back).abs() <= QUANTIZATION_STEP,
                "orig={orig} back={back}"
            );
        }
    }

    #[test]
    fn integer_layer_round_trip_is_exact_for_every_i16() {
        let all: Vec<i16> = (i16::MIN..=i16::MAX).collect();
        let wire = WireSample::from_pcm16(&all);
        let floats = decode_from_wire(&wire).unwrap();
        let re_encoded = encode_to_wire(&floats);
        assert_eq!(re_encoded, wire);
    }

    #[test]
    fn empty_input_encodes_to_empty_wire() {
        let wire = encode_to_wire(&[]);
        assert_eq!(wire.as_str(), "");
        assert!(decode_from_wire(&wire).unwrap().is_empty());
    }

    #[test]
    fn garbage_text_is_a_codec_error() {
        let wire = WireSample::from_text("not*base64!");
        assert!(matches!(decode_from_wire(&wire), Err(VoxError::Codec(_))));
        // "AA==" is a single byte
        let odd = WireSample::from_text("AA==");
        assert!(matches!(decode_from_wire(&odd), Err(VoxError::Codec(_))));
    }
}

//! 16-bit linear PCM conversion helpers shared by capture and playback.
//!
//! The wire carries mono PCM as base64 text: 16 kHz upstream, 24 kHz
//! downstream. Samples are quantized with `round(sample * 32768)` clamped to
//! the i16 range, and serialized little-endian.

use crate::error::{LiveError, LiveResult};
use base64::Engine as _;

/// Quantize normalized f32 samples (-1.0..1.0) to signed 16-bit integers.
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            (s * 32768.0)
                .round()
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

/// Inverse of [`quantize`]: i16 samples back to normalized f32.
pub fn dequantize(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Serialize i16 samples to little-endian bytes.
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian bytes back to i16 samples.
///
/// An odd byte count means a truncated or corrupt payload.
pub fn from_le_bytes(bytes: &[u8]) -> LiveResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(LiveError::Protocol(format!(
            "PCM payload has odd byte length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// Base64-encode a binary payload for the message envelope.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a base64 payload from the message envelope.
pub fn decode_base64(data: &str) -> LiveResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| LiveError::Protocol(format!("invalid base64 payload: {e}")))
}

/// Duration in seconds of a mono sample buffer at the given rate.
pub fn duration_secs(sample_count: usize, sample_rate: u32) -> f64 {
    sample_count as f64 / sample_rate as f64
}

//! Linear PCM16 encode/decode.
//!
//! The engine works internally in 32-bit floats in [-1, 1]. Both wire paths
//! carry 16-bit signed linear PCM: little-endian (base64-wrapped) on the
//! WebSocket path, network byte order inside L16 RTP payloads on the WebRTC
//! path.

use base64::prelude::*;

/// Convert float samples in [-1, 1] to little-endian PCM16 bytes.
///
/// Uses a saturating asymmetric scale (`s * 32768` for negative samples,
/// `s * 32767` for positive) so a full-scale input never wraps.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&sample_to_i16(s).to_le_bytes());
    }
    out
}

/// Convert little-endian PCM16 bytes to float samples in [-1, 1].
///
/// A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16_to_sample(i16::from_le_bytes([c[0], c[1]])))
        .collect()
}

/// Convert big-endian (network order) PCM16 bytes to float samples.
///
/// L16 RTP payloads are network byte order per RFC 3551.
pub fn pcm16_be_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16_to_sample(i16::from_be_bytes([c[0], c[1]])))
        .collect()
}

/// Convert float samples to big-endian PCM16 bytes for L16 RTP payloads.
pub fn f32_to_pcm16_be(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&sample_to_i16(s).to_be_bytes());
    }
    out
}

/// Base64-encode a PCM16 byte buffer for JSON framing.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decode a base64 PCM16 payload from a JSON envelope.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_STANDARD.decode(data)
}

#[inline]
fn sample_to_i16(s: f32) -> i16 {
    let s = s.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0).max(i16::MIN as f32) as i16
    } else {
        (s * 32767.0) as i16
    }
}

#[inline]
fn i16_to_sample(v: i16) -> f32 {
    if v < 0 {
        v as f32 / 32768.0
    } else {
        v as f32 / 32767.0
    }
}

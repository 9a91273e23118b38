//! Conversions between PCM 16-bit little-endian byte buffers, `i16` samples
//! and normalized `f32` samples, plus the signal measurements the VAD
//! fallback path relies on.

use base64::Engine;

/// Interprets little-endian PCM16 bytes as `i16` samples.
/// A trailing odd byte is ignored.
pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Serializes `i16` samples to little-endian PCM16 bytes.
pub fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Decodes PCM16 bytes into normalized f32 samples in [-1.0, 1.0].
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Encodes normalized f32 samples as PCM16 bytes.
pub fn f32_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let v = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Root-mean-square energy of a PCM16 byte buffer, normalized to [0.0, 1.0].
pub fn rms_energy(bytes: &[u8]) -> f32 {
    let samples = bytes_to_f32(bytes);
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Splits a PCM16 byte buffer into chunks of at most `chunk_bytes`, aligned
/// to whole samples. The final chunk may be shorter; no padding is added.
pub fn split_for_chunks(bytes: &[u8], chunk_bytes: usize) -> Vec<Vec<u8>> {
    let aligned = chunk_bytes - (chunk_bytes % 2);
    bytes.chunks(aligned.max(2)).map(|c| c.to_vec()).collect()
}

/// Encodes PCM16 bytes as base64 for JSON transport.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes a base64 string back into PCM16 bytes. Invalid input yields an
/// empty buffer.
pub fn decode_base64(encoded: &str) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_round_trip() {
        let samples = vec![0i16, 1000, -1000, i16::MAX, i16::MIN];
        let bytes = i16_to_bytes(&samples);
        assert_eq!(bytes_to_i16(&bytes), samples);
    }

    #[test]
    fn test_f32_round_trip_is_close() {
        let samples = vec![0.0f32, 0.5, -0.5, 0.99];
        let bytes = f32_to_bytes(&samples);
        let back = bytes_to_f32(&bytes);
        for (a, b) in samples.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_rms_energy_of_silence_is_zero() {
        let silence = vec![0u8; 640];
        assert_eq!(rms_energy(&silence), 0.0);
    }

    #[test]
    fn test_rms_energy_of_tone_is_positive() {
        let tone: Vec<f32> = (0..320)
            .map(|i| (i as f32 * 0.1).sin() * 0.8)
            .collect();
        let bytes = f32_to_bytes(&tone);
        assert!(rms_energy(&bytes) > 0.3);
    }

    #[test]
    fn test_split_preserves_content_and_alignment() {
        let bytes: Vec<u8> = (0..100).collect();
        // 33 is rounded down to 32 to stay sample-aligned.
        let chunks = split_for_chunks(&bytes, 33);
        let lengths: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(lengths, vec![32, 32, 32, 4]);
        let rejoined: Vec<u8> = chunks.concat();
        assert_eq!(rejoined, bytes);
    }

    #[test]
    fn test_base64_round_trip() {
        let bytes = vec![1u8, 2, 3, 250];
        assert_eq!(decode_base64(&encode_base64(&bytes)), bytes);
        assert!(decode_base64("not base64!!!").is_empty());
    }
}

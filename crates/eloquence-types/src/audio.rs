//! Audio constants and the binary framing used on the transport.
//!
//! All learner audio is PCM 16-bit little-endian, mono, 16 kHz, delivered in
//! 20 ms frames. Outbound synthesized audio is re-chunked into frames of at
//! most 100 ms, each prefixed with the interruption epoch it was produced
//! under so the transport can drop stale chunks after a barge-in.

/// Sample rate of all audio on the transport, in Hz.
pub const SAMPLE_RATE: u32 = 16_000;

/// Duration of one inbound audio frame, in milliseconds.
pub const INBOUND_FRAME_MS: u32 = 20;

/// Maximum duration of one outbound audio chunk, in milliseconds.
pub const OUTBOUND_CHUNK_MS: u32 = 100;

/// Bytes per sample (PCM 16-bit mono).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Samples in one inbound frame.
pub const SAMPLES_PER_INBOUND_FRAME: usize =
    (SAMPLE_RATE as usize / 1000) * INBOUND_FRAME_MS as usize;

/// Bytes in one inbound frame.
pub const BYTES_PER_INBOUND_FRAME: usize = SAMPLES_PER_INBOUND_FRAME * BYTES_PER_SAMPLE;

/// Duration in milliseconds of a PCM16 byte buffer at the transport rate.
pub fn pcm16_duration_ms(bytes: usize) -> u64 {
    (bytes as u64 / BYTES_PER_SAMPLE as u64) * 1000 / SAMPLE_RATE as u64
}

/// Number of PCM16 bytes covering `ms` milliseconds at the transport rate.
pub fn pcm16_bytes_for_ms(ms: u64) -> usize {
    (ms as usize * SAMPLE_RATE as usize / 1000) * BYTES_PER_SAMPLE
}

/// One outbound audio chunk: epoch-tagged PCM16 bytes.
///
/// On the wire this is a single binary message: an 8-byte little-endian
/// epoch, a 4-byte little-endian sequence number, then the raw PCM payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    epoch: u64,
    seq: u32,
    pcm: Vec<u8>,
}

impl AudioChunk {
    pub const HEADER_LEN: usize = 12;

    pub fn new(epoch: u64, seq: u32, pcm: Vec<u8>) -> Self {
        Self { epoch, seq, pcm }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    pub fn duration_ms(&self) -> u64 {
        pcm16_duration_ms(self.pcm.len())
    }

    pub fn into_pcm(self) -> Vec<u8> {
        self.pcm
    }

    /// Serializes the chunk into a single binary transport message.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.pcm.len());
        out.extend_from_slice(&self.epoch.to_le_bytes());
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.extend_from_slice(&self.pcm);
        out
    }

    /// Parses a binary transport message back into a chunk.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::HEADER_LEN {
            return None;
        }
        let epoch = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let seq = u32::from_le_bytes(bytes[8..12].try_into().ok()?);
        Some(Self {
            epoch,
            seq,
            pcm: bytes[Self::HEADER_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(SAMPLES_PER_INBOUND_FRAME, 320);
        assert_eq!(BYTES_PER_INBOUND_FRAME, 640);
    }

    #[test]
    fn test_duration_math() {
        assert_eq!(pcm16_duration_ms(BYTES_PER_INBOUND_FRAME), 20);
        assert_eq!(pcm16_bytes_for_ms(100), 3200);
        assert_eq!(pcm16_duration_ms(pcm16_bytes_for_ms(400)), 400);
    }

    #[test]
    fn test_chunk_encode_decode() {
        let chunk = AudioChunk::new(7, 42, vec![1, 2, 3, 4]);
        let bytes = chunk.encode();
        assert_eq!(bytes.len(), AudioChunk::HEADER_LEN + 4);

        let back = AudioChunk::decode(&bytes).unwrap();
        assert_eq!(back, chunk);
        assert_eq!(back.epoch(), 7);
        assert_eq!(back.seq(), 42);
    }

    #[test]
    fn test_decode_rejects_short_input() {
        assert!(AudioChunk::decode(&[0u8; 5]).is_none());
    }
}

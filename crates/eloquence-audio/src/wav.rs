//! WAV export for learner speech segments handed to the scoring queue.

use anyhow::{Context, Result};
use std::path::Path;

/// Writes a PCM16 mono byte buffer as a 16 kHz WAV file, creating parent
/// directories as needed.
pub fn write_pcm16(path: &Path, pcm: &[u8], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create wav file {}", path.display()))?;
    for sample in crate::pcm::bytes_to_i16(pcm) {
        writer.write_sample(sample)?;
    }
    writer.finalize().context("failed to finalize wav file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session").join("1.wav");

        let samples: Vec<i16> = (0..320).map(|i| (i * 10) as i16).collect();
        let pcm = crate::pcm::i16_to_bytes(&samples);
        write_pcm16(&path, &pcm, 16_000).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let back: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(back, samples);
    }
}

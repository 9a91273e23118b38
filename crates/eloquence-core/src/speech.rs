//! The TTS pipeline: emotion-tagged text in, paced audio chunks out.
//!
//! Text is split into sentence-bounded utterance units, each unit is served
//! from the process-wide cache or synthesized, and the resulting PCM is
//! re-chunked into ≤100 ms frames tagged with the interruption epoch under
//! which synthesis started. A unit that fails to synthesize produces a
//! `tts_fallback` frame and playback continues with the next unit.

use crate::cache::{CacheKey, TtsCache};
use crate::clients::{Synthesize, TtsRequest};
use crate::error::{CoreError, CoreResult};
use crate::transport::OutboundHandle;
use eloquence_audio::pcm;
use eloquence_types::audio::{pcm16_bytes_for_ms, AudioChunk, OUTBOUND_CHUNK_MS};
use eloquence_types::{Emotion, ServerFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Maximum characters per utterance unit.
const MAX_UNIT_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct TtsPipelineConfig {
    pub use_cache: bool,
    /// Outbound chunk duration in milliseconds.
    pub chunk_ms: u64,
    /// Sleep between chunks to approximate real-time playback. Disabled in
    /// tests that drive virtual time.
    pub pace_output: bool,
}

impl Default for TtsPipelineConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            chunk_ms: OUTBOUND_CHUNK_MS as u64,
            pace_output: true,
        }
    }
}

/// How one utterance played out.
#[derive(Debug, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// At least one unit produced audio.
    Completed { units: usize, cache_hits: usize },
    /// The epoch advanced or the token fired mid-utterance.
    Interrupted,
    /// Every unit failed; the turn should be recorded as degraded.
    Degraded,
}

pub struct TtsPipeline {
    synth: Arc<dyn Synthesize>,
    cache: Arc<TtsCache>,
    config: TtsPipelineConfig,
}

impl TtsPipeline {
    pub fn new(synth: Arc<dyn Synthesize>, cache: Arc<TtsCache>, config: TtsPipelineConfig) -> Self {
        Self {
            synth,
            cache,
            config,
        }
    }

    /// Streams one utterance to the client. Chunks carry the epoch current
    /// at call time; if the session epoch advances mid-stream the remaining
    /// units are abandoned.
    pub async fn speak(
        &self,
        text: &str,
        language: &str,
        voice_id: &str,
        emotion: Emotion,
        out: &OutboundHandle,
        cancel: &CancellationToken,
    ) -> CoreResult<SpeakOutcome> {
        let epoch = out.current_epoch();
        let units = split_utterances(text, MAX_UNIT_CHARS);
        if units.is_empty() {
            return Ok(SpeakOutcome::Completed {
                units: 0,
                cache_hits: 0,
            });
        }

        let mut seq: u32 = 0;
        let mut produced = 0usize;
        let mut cache_hits = 0usize;

        for unit in &units {
            if cancel.is_cancelled() || out.current_epoch() != epoch {
                return Ok(SpeakOutcome::Interrupted);
            }

            let request = TtsRequest {
                text: unit.clone(),
                language: language.to_string(),
                voice_id: voice_id.to_string(),
                emotion,
            };

            let pcm_payload = match self.unit_audio(&request, cancel).await {
                Ok(UnitAudio::Hit(pcm)) => {
                    cache_hits += 1;
                    pcm
                }
                Ok(UnitAudio::Synthesized(pcm)) => pcm,
                Err(CoreError::Cancelled) => return Ok(SpeakOutcome::Interrupted),
                Err(e) => {
                    tracing::warn!(error = %e, unit = %unit, "synthesis failed, skipping unit");
                    out.frame(ServerFrame::TtsFallback {
                        epoch,
                        unit: unit.clone(),
                    })
                    .await?;
                    continue;
                }
            };

            produced += 1;
            let chunk_bytes = pcm16_bytes_for_ms(self.config.chunk_ms);
            for piece in pcm::split_for_chunks(&pcm_payload, chunk_bytes) {
                if cancel.is_cancelled() || out.current_epoch() != epoch {
                    return Ok(SpeakOutcome::Interrupted);
                }
                let duration = eloquence_types::audio::pcm16_duration_ms(piece.len());
                out.audio(AudioChunk::new(epoch, seq, piece)).await?;
                seq += 1;

                if self.config.pace_output {
                    tokio::time::sleep(Duration::from_millis(duration)).await;
                }
            }
        }

        if produced == 0 {
            return Ok(SpeakOutcome::Degraded);
        }
        Ok(SpeakOutcome::Completed {
            units: produced,
            cache_hits,
        })
    }

    /// Pre-synthesizes canned coach phrases so the first turns are served
    /// from cache. Failures are logged and ignored.
    pub async fn prewarm(
        &self,
        phrases: &[&str],
        language: &str,
        voice_id: &str,
        emotion: Emotion,
    ) {
        if !self.config.use_cache {
            return;
        }
        for phrase in phrases {
            let request = TtsRequest {
                text: phrase.to_string(),
                language: language.to_string(),
                voice_id: voice_id.to_string(),
                emotion,
            };
            let key = CacheKey::for_request(&request);
            if self.cache.get(&key).is_some() {
                continue;
            }
            match self.synth.synthesize(&request, CancellationToken::new()).await {
                Ok(pcm) => {
                    self.cache.put(key, &pcm);
                }
                Err(e) => {
                    tracing::debug!(error = %e, phrase = %phrase, "prewarm synthesis failed");
                }
            }
        }
    }

    async fn unit_audio(
        &self,
        request: &TtsRequest,
        cancel: &CancellationToken,
    ) -> CoreResult<UnitAudio> {
        let key = CacheKey::for_request(request);
        if self.config.use_cache {
            if let Some(pcm) = self.cache.get(&key) {
                return Ok(UnitAudio::Hit(pcm));
            }
        }

        let pcm = self.synth.synthesize(request, cancel.clone()).await?;
        if self.config.use_cache {
            self.cache.put(key, &pcm);
        }
        Ok(UnitAudio::Synthesized(pcm))
    }
}

enum UnitAudio {
    Hit(Vec<u8>),
    Synthesized(Vec<u8>),
}

/// Splits text into utterance units of at most `max_chars`, cutting on
/// sentence boundaries and preserving punctuation. Sentences longer than the
/// limit are hard-split on whitespace.
pub fn split_utterances(text: &str, max_chars: usize) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '…') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    // Pack sentences into units, hard-splitting oversized ones.
    let mut units: Vec<String> = Vec::new();
    for sentence in sentences {
        if sentence.chars().count() > max_chars {
            units.extend(hard_split(&sentence, max_chars));
            continue;
        }
        match units.last_mut() {
            Some(last) if last.chars().count() + 1 + sentence.chars().count() <= max_chars => {
                last.push(' ');
                last.push_str(&sentence);
            }
            _ => units.push(sentence),
        }
    }
    units
}

fn hard_split(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            parts.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

//! Process-wide cache of synthesized speech.
//!
//! Keyed by a digest of (language, voice, emotion, normalized text); values
//! are gzip-compressed PCM payloads with a TTL. Shared across all sessions:
//! many concurrent readers, writes serialize per key inside the map shard.

use crate::clients::TtsRequest;
use dashmap::DashMap;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);

/// Payloads at or above this size are always worth storing.
const ALWAYS_STORE_BYTES: usize = 4 * 1024;

/// Below [`ALWAYS_STORE_BYTES`], store only if compression achieved this.
const MAX_STORE_RATIO: f64 = 0.9;

/// Cache key: digest over the full synthesis identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn for_request(request: &TtsRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(request.language.as_bytes());
        hasher.update(b"\0");
        hasher.update(request.voice_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(request.emotion.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(normalize_text(&request.text).as_bytes());
        Self(hasher.finalize().into())
    }
}

/// Whitespace-collapsed, trimmed, lowercased text so formatting variants of
/// the same utterance share an entry.
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

struct Entry {
    compressed: Vec<u8>,
    uncompressed_len: usize,
    duration_ms: u64,
    created_at: Instant,
}

/// Hit/miss accounting, shared with metrics consumers.
#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

pub struct TtsCache {
    entries: DashMap<CacheKey, Entry>,
    ttl: Duration,
    stats: Arc<CacheStats>,
}

impl TtsCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        self.stats.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a synthesized payload; expired entries count as misses and
    /// are evicted in place.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.created_at.elapsed() <= self.ttl {
                    let pcm = decompress(&entry.compressed, entry.uncompressed_len);
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(duration_ms = entry.duration_ms, "tts cache hit");
                    return pcm;
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores a payload if it is large enough or compresses well enough.
    /// Returns whether the payload was stored.
    pub fn put(&self, key: CacheKey, pcm: &[u8]) -> bool {
        let compressed = match compress(pcm) {
            Some(c) => c,
            None => return false,
        };

        let ratio = compressed.len() as f64 / pcm.len().max(1) as f64;
        if pcm.len() < ALWAYS_STORE_BYTES && ratio > MAX_STORE_RATIO {
            tracing::debug!(len = pcm.len(), ratio, "skipping cache write, poor compression");
            return false;
        }

        self.entries.insert(
            key,
            Entry {
                compressed,
                uncompressed_len: pcm.len(),
                duration_ms: eloquence_types::audio::pcm16_duration_ms(pcm.len()),
                created_at: Instant::now(),
            },
        );
        true
    }

    /// Removes all expired entries. Called opportunistically by the owner.
    pub fn evict_expired(&self) {
        self.entries
            .retain(|_, entry| entry.created_at.elapsed() <= self.ttl);
    }
}

impl Default for TtsCache {
    fn default() -> Self {
        Self::new()
    }
}

fn compress(pcm: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(pcm).ok()?;
    encoder.finish().ok()
}

fn decompress(compressed: &[u8], expected_len: usize) -> Option<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut out = Vec::with_capacity(expected_len);
    decoder.read_to_end(&mut out).ok()?;
    Some(out)
}

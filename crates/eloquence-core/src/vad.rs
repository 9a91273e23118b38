//! Voice-activity gate over the inbound frame stream.
//!
//! Wraps an external Silero-class detector with hysteresis: speech starts
//! after two consecutive frames above the threshold, ends after
//! `min_silence_ms` of continuous silence, and every committed segment is
//! padded with `speech_pad_ms` of audio on both sides. When the detector
//! fails the gate degrades to RMS-energy detection and keeps the session
//! alive.

use crate::error::CoreResult;
use async_trait::async_trait;
use eloquence_audio::pcm;
use eloquence_types::audio::pcm16_duration_ms;
use std::collections::VecDeque;

/// Per-frame speech classifier. The production implementation calls the
/// external VAD model; tests and the degraded path use [`EnergyDetector`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechDetector: Send + Sync {
    /// Probability in [0.0, 1.0] that `frame` (PCM16 bytes) contains speech.
    async fn speech_probability(&mut self, frame: &[u8]) -> CoreResult<f32>;
}

/// Local RMS-energy detector, used as the fallback when the model RPC is
/// unavailable. Maps normalized energy onto a pseudo-probability.
pub struct EnergyDetector {
    /// RMS level treated as certain speech.
    reference_level: f32,
}

impl EnergyDetector {
    pub fn new(reference_level: f32) -> Self {
        Self { reference_level }
    }
}

impl Default for EnergyDetector {
    fn default() -> Self {
        Self::new(0.12)
    }
}

#[async_trait]
impl SpeechDetector for Box<dyn SpeechDetector> {
    async fn speech_probability(&mut self, frame: &[u8]) -> CoreResult<f32> {
        (**self).speech_probability(frame).await
    }
}

#[async_trait]
impl SpeechDetector for EnergyDetector {
    async fn speech_probability(&mut self, frame: &[u8]) -> CoreResult<f32> {
        let energy = pcm::rms_energy(frame);
        Ok((energy / self.reference_level).min(1.0))
    }
}

/// Gate tuning. Defaults follow the deployed configuration.
#[derive(Debug, Clone)]
pub struct VadConfig {
    pub threshold: f32,
    pub min_silence_ms: u64,
    pub speech_pad_ms: u64,
    /// Consecutive frames above threshold required to confirm speech.
    pub consecutive_speech_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.45,
            min_silence_ms: 2000,
            speech_pad_ms: 400,
            consecutive_speech_frames: 2,
        }
    }
}

/// A committed window of learner speech, padded on both sides.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub pcm: Vec<u8>,
    pub rms: f32,
}

impl SpeechSegment {
    pub fn duration_ms(&self) -> u64 {
        pcm16_duration_ms(self.pcm.len())
    }
}

/// Events emitted by the gate.
#[derive(Debug)]
pub enum VadEvent {
    SpeechStart { at_ms: u64 },
    SpeechEnd(SpeechSegment),
    /// Speech confirmed while the agent was speaking.
    BargeIn { at_ms: u64 },
    /// The detector RPC failed; the gate switched to energy detection.
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum GateState {
    Silence,
    /// Frames above threshold, start not yet confirmed.
    PendingSpeech { frames: u32 },
    Speaking,
    /// Inside a segment, waiting out the silence threshold.
    TrailingSilence { silence_ms: u64 },
}

/// The gate itself. One per session; not shared across sessions.
pub struct VadGate<D: SpeechDetector> {
    config: VadConfig,
    detector: D,
    fallback: EnergyDetector,
    state: GateState,
    /// Rolling buffer of recent frames for pre-padding.
    prelude: VecDeque<Vec<u8>>,
    prelude_ms: u64,
    /// Audio of the active segment, including trailing silence.
    segment: Vec<u8>,
    segment_start_ms: u64,
    last_speech_ms: u64,
    clock_ms: u64,
    degraded: bool,
}

impl<D: SpeechDetector> VadGate<D> {
    pub fn new(config: VadConfig, detector: D) -> Self {
        Self {
            config,
            detector,
            fallback: EnergyDetector::default(),
            state: GateState::Silence,
            prelude: VecDeque::new(),
            prelude_ms: 0,
            segment: Vec::new(),
            segment_start_ms: 0,
            last_speech_ms: 0,
            clock_ms: 0,
            degraded: false,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Milliseconds of audio consumed so far.
    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    /// Feeds one inbound frame through the gate. `agent_speaking` marks the
    /// TTS-playback phase and turns a confirmed start into a barge-in.
    pub async fn push_frame(&mut self, frame: &[u8], agent_speaking: bool) -> Vec<VadEvent> {
        let frame_ms = pcm16_duration_ms(frame.len());
        let mut events = Vec::new();

        let prob = match self.detector.speech_probability(frame).await {
            Ok(p) => p,
            Err(e) => {
                if !self.degraded {
                    tracing::warn!(error = %e, "vad detector failed, falling back to energy detection");
                    self.degraded = true;
                    events.push(VadEvent::Degraded);
                }
                self.fallback
                    .speech_probability(frame)
                    .await
                    .unwrap_or(0.0)
            }
        };
        let is_speech = prob >= self.config.threshold;

        match self.state {
            GateState::Silence => {
                if is_speech {
                    self.state = GateState::PendingSpeech { frames: 1 };
                    self.maybe_confirm_start(agent_speaking, &mut events);
                }
            }
            GateState::PendingSpeech { frames } => {
                if is_speech {
                    self.state = GateState::PendingSpeech { frames: frames + 1 };
                    self.maybe_confirm_start(agent_speaking, &mut events);
                } else {
                    self.state = GateState::Silence;
                }
            }
            GateState::Speaking => {
                if !is_speech {
                    self.state = GateState::TrailingSilence { silence_ms: frame_ms };
                } else {
                    self.last_speech_ms = self.clock_ms + frame_ms;
                }
            }
            GateState::TrailingSilence { silence_ms } => {
                if is_speech {
                    self.last_speech_ms = self.clock_ms + frame_ms;
                    self.state = GateState::Speaking;
                } else {
                    let silence_ms = silence_ms + frame_ms;
                    if silence_ms >= self.config.min_silence_ms {
                        let segment = self.commit_segment();
                        events.push(VadEvent::SpeechEnd(segment));
                        self.state = GateState::Silence;
                    } else {
                        self.state = GateState::TrailingSilence { silence_ms };
                    }
                }
            }
        }

        // Segment audio accumulates while a segment is active; otherwise the
        // frame rolls into the pre-pad buffer.
        match self.state {
            GateState::Speaking | GateState::TrailingSilence { .. } => {
                self.segment.extend_from_slice(frame);
            }
            _ => self.push_prelude(frame, frame_ms),
        }

        self.clock_ms += frame_ms;
        events
    }

    fn maybe_confirm_start(&mut self, agent_speaking: bool, events: &mut Vec<VadEvent>) {
        let frames = match self.state {
            GateState::PendingSpeech { frames } => frames,
            _ => return,
        };
        if frames < self.config.consecutive_speech_frames {
            return;
        }

        // Start confirmed. Seed the segment with the pre-pad audio.
        let pad_bytes: Vec<u8> = self.prelude.iter().flatten().copied().collect();
        let pad_ms = pcm16_duration_ms(pad_bytes.len());
        self.segment = pad_bytes;
        self.segment_start_ms = self.clock_ms.saturating_sub(pad_ms);
        self.last_speech_ms = self.clock_ms;
        self.prelude.clear();
        self.prelude_ms = 0;
        self.state = GateState::Speaking;

        events.push(VadEvent::SpeechStart { at_ms: self.clock_ms });
        if agent_speaking {
            events.push(VadEvent::BargeIn { at_ms: self.clock_ms });
        }
    }

    fn commit_segment(&mut self) -> SpeechSegment {
        // Trim trailing silence beyond the post-pad.
        let end_ms = self.last_speech_ms + self.config.speech_pad_ms;
        let keep_ms = end_ms.saturating_sub(self.segment_start_ms);
        let keep_bytes = eloquence_types::audio::pcm16_bytes_for_ms(keep_ms).min(self.segment.len());
        let pcm: Vec<u8> = self.segment.drain(..).collect::<Vec<u8>>()[..keep_bytes].to_vec();
        let rms = pcm::rms_energy(&pcm);

        SpeechSegment {
            start_ms: self.segment_start_ms,
            end_ms: self.segment_start_ms + pcm16_duration_ms(pcm.len()),
            pcm,
            rms,
        }
    }

    fn push_prelude(&mut self, frame: &[u8], frame_ms: u64) {
        self.prelude.push_back(frame.to_vec());
        self.prelude_ms += frame_ms;
        while self.prelude_ms > self.config.speech_pad_ms {
            if let Some(front) = self.prelude.pop_front() {
                self.prelude_ms -= pcm16_duration_ms(front.len());
            } else {
                break;
            }
        }
    }

    /// Milliseconds of silence inside an active segment, if any. Drives the
    /// gentle re-prompt timer.
    pub fn trailing_silence_ms(&self) -> Option<u64> {
        match self.state {
            GateState::TrailingSilence { silence_ms } => Some(silence_ms),
            _ => None,
        }
    }

    /// Drops any in-progress segment, e.g. after an interruption restart.
    pub fn reset(&mut self) {
        self.state = GateState::Silence;
        self.segment.clear();
        self.prelude.clear();
        self.prelude_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use eloquence_types::audio::BYTES_PER_INBOUND_FRAME;

    /// Detector scripted by a probability sequence.
    struct Scripted {
        probs: Vec<f32>,
        at: usize,
    }

    impl Scripted {
        fn new(probs: Vec<f32>) -> Self {
            Self { probs, at: 0 }
        }
    }

    #[async_trait]
    impl SpeechDetector for Scripted {
        async fn speech_probability(&mut self, _frame: &[u8]) -> CoreResult<f32> {
            let p = self.probs.get(self.at).copied().unwrap_or(0.0);
            self.at += 1;
            Ok(p)
        }
    }

    struct Failing;

    #[async_trait]
    impl SpeechDetector for Failing {
        async fn speech_probability(&mut self, _frame: &[u8]) -> CoreResult<f32> {
            Err(CoreError::upstream("vad", "connection refused"))
        }
    }

    fn frame() -> Vec<u8> {
        vec![0u8; BYTES_PER_INBOUND_FRAME]
    }

    fn loud_frame() -> Vec<u8> {
        let samples: Vec<f32> = (0..320).map(|i| (i as f32 * 0.3).sin() * 0.8).collect();
        pcm::f32_to_bytes(&samples)
    }

    fn config_for_tests() -> VadConfig {
        VadConfig {
            threshold: 0.45,
            min_silence_ms: 100,
            speech_pad_ms: 40,
            consecutive_speech_frames: 2,
        }
    }

    #[tokio::test]
    async fn test_single_frame_does_not_confirm_speech() {
        let probs = vec![0.9, 0.1, 0.1];
        let mut gate = VadGate::new(config_for_tests(), Scripted::new(probs));
        for _ in 0..3 {
            let events = gate.push_frame(&frame(), false).await;
            assert!(events.is_empty());
        }
    }

    #[tokio::test]
    async fn test_speech_start_after_two_frames_then_end_after_silence() {
        // 4 speech frames, then silence until the 100ms threshold passes.
        let probs = vec![0.9, 0.9, 0.9, 0.9, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1];
        let mut gate = VadGate::new(config_for_tests(), Scripted::new(probs));

        let mut started = false;
        let mut segment = None;
        for _ in 0..10 {
            for event in gate.push_frame(&frame(), false).await {
                match event {
                    VadEvent::SpeechStart { .. } => started = true,
                    VadEvent::SpeechEnd(s) => segment = Some(s),
                    other => panic!("unexpected event {:?}", other),
                }
            }
        }
        assert!(started);
        let segment = segment.expect("segment should commit");
        assert!(segment.duration_ms() > 0);
        assert!(segment.end_ms > segment.start_ms);
    }

    #[tokio::test]
    async fn test_no_overlapping_segments() {
        // Speech resumes during trailing silence: must stay one segment.
        let probs = vec![0.9, 0.9, 0.9, 0.1, 0.9, 0.9, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1];
        let mut gate = VadGate::new(config_for_tests(), Scripted::new(probs));

        let mut starts = 0;
        let mut ends = 0;
        for _ in 0..12 {
            for event in gate.push_frame(&frame(), false).await {
                match event {
                    VadEvent::SpeechStart { .. } => starts += 1,
                    VadEvent::SpeechEnd(_) => ends += 1,
                    _ => {}
                }
            }
        }
        assert_eq!(starts, 1);
        assert_eq!(ends, 1);
    }

    #[tokio::test]
    async fn test_barge_in_fires_when_agent_speaking() {
        let probs = vec![0.9, 0.9];
        let mut gate = VadGate::new(config_for_tests(), Scripted::new(probs));

        gate.push_frame(&frame(), true).await;
        let events = gate.push_frame(&frame(), true).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, VadEvent::BargeIn { .. })));
    }

    #[tokio::test]
    async fn test_prepad_is_prepended_to_segment() {
        // Two silence frames roll through the prelude, then speech begins.
        let probs = vec![0.0, 0.0, 0.9, 0.9, 0.9, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let mut gate = VadGate::new(config_for_tests(), Scripted::new(probs));

        let mut segment = None;
        for _ in 0..11 {
            for event in gate.push_frame(&frame(), false).await {
                if let VadEvent::SpeechEnd(s) = event {
                    segment = Some(s);
                }
            }
        }
        let segment = segment.unwrap();
        // 40ms of pad is prepended, pulling the start back before the
        // confirmation point (speech confirmed at 60ms on the gate clock).
        assert_eq!(segment.start_ms, 20);
    }

    #[tokio::test]
    async fn test_detector_failure_degrades_to_energy() {
        let mut config = config_for_tests();
        config.consecutive_speech_frames = 1;
        let mut gate = VadGate::new(config, Failing);

        let events = gate.push_frame(&loud_frame(), false).await;
        assert!(events.iter().any(|e| matches!(e, VadEvent::Degraded)));
        assert!(gate.is_degraded());
        // Loud audio still confirms speech through the energy fallback.
        assert!(events
            .iter()
            .any(|e| matches!(e, VadEvent::SpeechStart { .. })));
    }
}

//! Per-learner session: the supervisor task that multiplexes the transport
//! with the VAD gate, the turn pipeline and the interruption arbiter.
//!
//! State machine: Idle → Listening → Transcribing → ResponseGen →
//! ResponseSpeak → Listening, with Ended reachable from everywhere. The
//! supervisor owns the inbound loop; each conversational turn runs as one
//! spawned task carrying the session id and the epoch it started under, so
//! a barge-in can cancel the whole turn by advancing the epoch and firing
//! the shared cancellation token.

use crate::clients::{Generate, Transcribe};
use crate::dialogue::{self, DialogueConfig, DialogueManager};
use crate::error::CoreError;
use crate::feedback::{FeedbackSink, ScoringJob};
use crate::interrupt::InterruptionArbiter;
use crate::scenario::ScenarioEngine;
use crate::speech::{SpeakOutcome, TtsPipeline};
use crate::transport::{spawn_writer, Inbound, OutboundHandle, TransportSink};
use crate::vad::{SpeechDetector, SpeechSegment, VadConfig, VadEvent, VadGate};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use eloquence_types::error::ErrorPayload;
use eloquence_types::scenario::ScenarioTemplate;
use eloquence_types::{AgentProfile, ErrorCode, Role, ServerFrame, Turn};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const OUTBOUND_CAPACITY: usize = 256;
const INBOUND_CAPACITY: usize = 256;
const DEFAULT_VOICE: &str = "p225";

/// Pipeline phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listening,
    Transcribing,
    ResponseGen,
    ResponseSpeak,
    Ended,
}

impl Phase {
    fn as_u8(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Listening => 1,
            Phase::Transcribing => 2,
            Phase::ResponseGen => 3,
            Phase::ResponseSpeak => 4,
            Phase::Ended => 5,
        }
    }

    fn from_u8(v: u8) -> Phase {
        match v {
            0 => Phase::Idle,
            1 => Phase::Listening,
            2 => Phase::Transcribing,
            3 => Phase::ResponseGen,
            4 => Phase::ResponseSpeak,
            _ => Phase::Ended,
        }
    }

    /// Phases during which a confirmed speech start is a barge-in.
    pub fn is_interruptible(self) -> bool {
        matches!(self, Phase::ResponseGen | Phase::ResponseSpeak)
    }
}

/// Phase cell shared between the supervisor and the turn task.
#[derive(Clone)]
pub struct SharedPhase(Arc<AtomicU8>);

impl SharedPhase {
    pub fn new(phase: Phase) -> Self {
        Self(Arc::new(AtomicU8::new(phase.as_u8())))
    }

    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, phase: Phase) {
        self.0.store(phase.as_u8(), Ordering::SeqCst);
    }
}

/// Session tuning. Defaults follow the deployed configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub liveness_timeout: Duration,
    /// Inbound frames buffered before the session is declared a slow
    /// consumer (100 × 20 ms = 2 s).
    pub max_buffered_frames: usize,
    /// Silence inside a learner turn after which a short encouraging
    /// re-prompt is spoken. `None` disables the re-prompt.
    pub gentle_prompt_silence_ms: Option<u64>,
    /// Pre-synthesize the canned coach phrases at session start.
    pub prewarm_phrases: bool,
    /// Enqueue scoring jobs per turn instead of only at session end.
    pub feedback_per_turn: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(600),
            heartbeat_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(60),
            max_buffered_frames: 100,
            gentle_prompt_silence_ms: Some(1200),
            prewarm_phrases: true,
            feedback_per_turn: false,
        }
    }
}

/// External service handles shared by all sessions.
#[derive(Clone)]
pub struct SessionDeps {
    pub asr: Arc<dyn Transcribe>,
    pub llm: Arc<dyn Generate>,
    pub tts: Arc<TtsPipeline>,
    pub feedback: Arc<FeedbackSink>,
}

/// Everything needed to start one session.
pub struct SessionParams {
    pub session_id: String,
    pub learner_id: String,
    pub language: String,
    pub agent: Arc<AgentProfile>,
    pub scenario: Option<Arc<ScenarioTemplate>>,
    pub config: SessionConfig,
    pub dialogue: DialogueConfig,
    pub vad: VadConfig,
}

/// Control messages delivered through the registry.
#[derive(Debug)]
pub enum SessionControl {
    End,
}

pub struct SessionEntry {
    pub learner_id: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    control: mpsc::Sender<SessionControl>,
}

/// Process-wide registry; pipeline tasks and the HTTP plane look sessions
/// up by id instead of holding back-pointers.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Requests an orderly end. Returns false when the session is unknown,
    /// which callers surface as an idempotent success.
    pub async fn end(&self, session_id: &str) -> bool {
        let control = match self.sessions.get(session_id) {
            Some(entry) => entry.control.clone(),
            None => return false,
        };
        control.send(SessionControl::End).await.is_ok()
    }

    fn insert(&self, session_id: String, entry: SessionEntry) {
        self.sessions.insert(session_id, entry);
    }

    fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}

/// Why the supervisor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    ClientStop,
    ControlPlane,
    TransportClosed,
    IdleTimeout,
    LivenessTimeout,
    SlowConsumer,
    Fatal,
}

/// Outcome of one spawned turn pipeline.
#[derive(Debug)]
enum TurnOutcome {
    Completed,
    Cancelled,
    /// Segment under the ASR minimum; dropped without surfacing anything.
    SegmentDropped,
    Failed(CoreError),
}

pub struct Session;

impl Session {
    /// Registers the session and spawns its supervisor task. The inbound
    /// channel is fed by the transport owner (capacity [`inbound_channel`]);
    /// outbound traffic goes through `sink`.
    pub fn spawn(
        params: SessionParams,
        deps: SessionDeps,
        registry: Arc<SessionRegistry>,
        detector: Box<dyn SpeechDetector>,
        inbound: mpsc::Receiver<Inbound>,
        sink: Arc<dyn TransportSink>,
    ) -> JoinHandle<()> {
        let (control_tx, control_rx) = mpsc::channel(4);
        registry.insert(
            params.session_id.clone(),
            SessionEntry {
                learner_id: params.learner_id.clone(),
                language: params.language.clone(),
                created_at: Utc::now(),
                control: control_tx,
            },
        );

        tokio::spawn(run_supervisor(
            params, deps, registry, detector, inbound, control_rx, sink,
        ))
    }

    /// Creates the inbound channel with the session's standard capacity.
    pub fn inbound_channel() -> (mpsc::Sender<Inbound>, mpsc::Receiver<Inbound>) {
        mpsc::channel(INBOUND_CAPACITY)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_supervisor(
    params: SessionParams,
    deps: SessionDeps,
    registry: Arc<SessionRegistry>,
    detector: Box<dyn SpeechDetector>,
    mut inbound: mpsc::Receiver<Inbound>,
    mut control_rx: mpsc::Receiver<SessionControl>,
    sink: Arc<dyn TransportSink>,
) {
    let session_id = params.session_id.clone();
    let language = params.language.clone();
    let voice_id = params
        .agent
        .voice_id()
        .unwrap_or(DEFAULT_VOICE)
        .to_string();

    let epoch = Arc::new(AtomicU64::new(0));
    let (out, writer_task) = spawn_writer(sink.clone(), epoch.clone(), OUTBOUND_CAPACITY);
    let arbiter = Arc::new(InterruptionArbiter::new(epoch));
    let phase = SharedPhase::new(Phase::Idle);
    let mut gate = VadGate::new(params.vad.clone(), detector);

    let scenario_engine = params.scenario.clone().map(ScenarioEngine::new);
    let dialogue = Arc::new(Mutex::new(DialogueManager::new(
        params.agent.clone(),
        language.clone(),
        deps.llm.clone(),
        scenario_engine,
        params.dialogue.clone(),
    )));

    if params.config.prewarm_phrases {
        let tts = deps.tts.clone();
        let language = language.clone();
        let voice = voice_id.clone();
        tokio::spawn(async move {
            for (emotion, phrase) in dialogue::canned_phrases(&language).iter() {
                tts.prewarm(&[*phrase], &language, &voice, *emotion).await;
            }
        });
    }

    let session_start = Utc::now();
    let mut last_inbound = tokio::time::Instant::now();
    let mut last_activity = tokio::time::Instant::now();
    let (turn_done_tx, mut turn_done_rx) = mpsc::channel::<TurnOutcome>(4);
    let mut turn_task: Option<JoinHandle<()>> = None;
    let mut turn_cancel: Option<CancellationToken> = None;
    let mut turn_counter: usize = 0;
    let mut pending_interrupt_ack = false;
    let mut gentle_fired = false;
    let mut gentle_cancel: Option<CancellationToken> = None;

    let mut heartbeat = tokio::time::interval(params.config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await; // consume the immediate first tick

    tracing::info!(session = %session_id, learner = %params.learner_id, "session started");

    let reason = loop {
        tokio::select! {
            biased;

            maybe_ctrl = control_rx.recv() => {
                match maybe_ctrl {
                    Some(SessionControl::End) | None => break EndReason::ControlPlane,
                }
            }

            maybe_outcome = turn_done_rx.recv(), if turn_task.is_some() => {
                turn_task = None;
                turn_cancel = None;
                arbiter.clear();
                let Some(outcome) = maybe_outcome else { continue };
                match outcome {
                    TurnOutcome::Completed | TurnOutcome::SegmentDropped => {
                        if phase.get() != Phase::Ended && phase.get() != Phase::Listening {
                            phase.set(Phase::Listening);
                        }
                    }
                    TurnOutcome::Cancelled => {
                        // The arbiter already moved the session to Listening.
                    }
                    TurnOutcome::Failed(e) => {
                        tracing::error!(session = %session_id, error = %e, "turn failed");
                        let code = e.code();
                        if !code.is_internal_only() {
                            let frame = ServerFrame::Error {
                                epoch: out.current_epoch(),
                                payload: error_payload(code, &e),
                            };
                            let _ = out.frame(frame).await;
                        }
                        if code.is_fatal() {
                            break EndReason::Fatal;
                        }
                        phase.set(Phase::Listening);
                    }
                }
            }

            maybe_inbound = inbound.recv() => {
                let Some(message) = maybe_inbound else { break EndReason::TransportClosed };
                last_inbound = tokio::time::Instant::now();
                // Pings keep the connection alive but do not count as
                // conversational activity for the idle timeout.
                if !matches!(message, Inbound::Control(eloquence_types::ClientFrame::Ping { .. })) {
                    last_activity = last_inbound;
                }

                match message {
                    Inbound::Closed => break EndReason::TransportClosed,
                    Inbound::Control(frame) => {
                        use eloquence_types::ClientFrame;
                        match frame {
                            ClientFrame::StartStream { .. } => {
                                if phase.get() == Phase::Idle {
                                    phase.set(Phase::Listening);
                                    let frame = ServerFrame::StreamStarted {
                                        epoch: out.current_epoch(),
                                        session_id: session_id.clone(),
                                    };
                                    if out.frame(frame).await.is_err() {
                                        break EndReason::TransportClosed;
                                    }
                                }
                            }
                            ClientFrame::StopStream { .. } => break EndReason::ClientStop,
                            ClientFrame::Cancel { .. } => {
                                if phase.get().is_interruptible() {
                                    if arbiter.trip(&out).await.is_err() {
                                        break EndReason::TransportClosed;
                                    }
                                    phase.set(Phase::Listening);
                                    pending_interrupt_ack = true;
                                    let mut guard = dialogue.lock().await;
                                    guard.note_interruption();
                                    drop(guard);
                                }
                            }
                            ClientFrame::Ping { .. } => {}
                        }
                    }
                    Inbound::Audio(frame_bytes) => {
                        if inbound.len() > params.config.max_buffered_frames {
                            let frame = ServerFrame::Error {
                                epoch: out.current_epoch(),
                                payload: ErrorPayload::new(
                                    ErrorCode::SlowConsumer,
                                    "inbound audio queue exceeded 2s",
                                ),
                            };
                            let _ = out.frame(frame).await;
                            break EndReason::SlowConsumer;
                        }

                        let current = phase.get();
                        if !matches!(
                            current,
                            Phase::Listening | Phase::ResponseGen | Phase::ResponseSpeak
                        ) {
                            continue;
                        }

                        let events = gate
                            .push_frame(&frame_bytes, current.is_interruptible())
                            .await;
                        for event in events {
                            match event {
                                VadEvent::SpeechStart { at_ms } => {
                                    tracing::debug!(session = %session_id, at_ms, "speech start");
                                    gentle_fired = false;
                                    if let Some(cancel) = gentle_cancel.take() {
                                        cancel.cancel();
                                    }
                                }
                                VadEvent::Degraded => {
                                    tracing::warn!(session = %session_id, "vad degraded to energy detection");
                                }
                                VadEvent::BargeIn { at_ms } => {
                                    if phase.get().is_interruptible() {
                                        tracing::info!(session = %session_id, at_ms, "barge-in");
                                        if arbiter.trip(&out).await.is_err() {
                                            break;
                                        }
                                        phase.set(Phase::Listening);
                                        pending_interrupt_ack = true;
                                    }
                                }
                                VadEvent::SpeechEnd(segment) => {
                                    if phase.get() == Phase::Listening && turn_task.is_none() {
                                        // A turn's synthesis must never overlap
                                        // the re-prompt.
                                        if let Some(cancel) = gentle_cancel.take() {
                                            cancel.cancel();
                                        }
                                        turn_counter += 1;
                                        phase.set(Phase::Transcribing);
                                        let cancel = CancellationToken::new();
                                        arbiter.register(cancel.clone());
                                        turn_cancel = Some(cancel.clone());

                                        let ctx = TurnContext {
                                            deps: deps.clone(),
                                            dialogue: dialogue.clone(),
                                            session_id: session_id.clone(),
                                            turn_index: turn_counter,
                                            session_start,
                                            language: language.clone(),
                                            voice_id: voice_id.clone(),
                                            out: out.clone(),
                                            phase: phase.clone(),
                                            interrupt_ack: pending_interrupt_ack,
                                            feedback_per_turn: params.config.feedback_per_turn,
                                        };
                                        pending_interrupt_ack = false;
                                        let done = turn_done_tx.clone();
                                        turn_task = Some(tokio::spawn(async move {
                                            let outcome = run_turn(ctx, segment, cancel).await;
                                            let _ = done.send(outcome).await;
                                        }));
                                    } else {
                                        tracing::debug!(
                                            session = %session_id,
                                            "segment dropped, pipeline busy"
                                        );
                                    }
                                }
                            }
                        }

                        // Gentle re-prompt when the learner stalls mid-turn.
                        if let Some(threshold_ms) = params.config.gentle_prompt_silence_ms {
                            if phase.get() == Phase::Listening
                                && turn_task.is_none()
                                && !gentle_fired
                                && gate.trailing_silence_ms().is_some_and(|ms| ms >= threshold_ms)
                            {
                                gentle_fired = true;
                                let cancel = CancellationToken::new();
                                gentle_cancel = Some(cancel.clone());
                                let (text, emotion) = dialogue::gentle_prompt(&language);
                                let tts = deps.tts.clone();
                                let out = out.clone();
                                let language = language.clone();
                                let voice = voice_id.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = tts
                                        .speak(text, &language, &voice, emotion, &out, &cancel)
                                        .await
                                    {
                                        tracing::debug!(error = %e, "gentle prompt failed");
                                    }
                                });
                            }
                        }
                    }
                }
            }

            _ = heartbeat.tick() => {
                let frame = ServerFrame::Heartbeat { epoch: out.current_epoch() };
                if out.frame(frame).await.is_err() {
                    break EndReason::TransportClosed;
                }
                if last_inbound.elapsed() >= params.config.liveness_timeout {
                    break EndReason::LivenessTimeout;
                }
                if last_activity.elapsed() >= params.config.idle_timeout {
                    break EndReason::IdleTimeout;
                }
            }
        }
    };

    tracing::info!(session = %session_id, ?reason, "session ending");
    phase.set(Phase::Ended);

    // Converge every end path on the same release order: cancel the
    // pipeline, hand finalized turns to the feedback sink, close the wire.
    if let Some(cancel) = turn_cancel.take() {
        cancel.cancel();
    }
    if let Some(cancel) = gentle_cancel.take() {
        cancel.cancel();
    }
    if let Some(task) = turn_task.take() {
        if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
            tracing::warn!(session = %session_id, "turn task did not stop in time");
        }
    }

    {
        let guard = dialogue.lock().await;
        submit_finalized_turns(&deps.feedback, &session_id, &language, guard.history());
    }

    let _ = sink.close().await;
    drop(out);
    let _ = writer_task.await;
    registry.remove(&session_id);
    tracing::info!(session = %session_id, "session ended");
}

fn error_payload(code: ErrorCode, error: &CoreError) -> ErrorPayload {
    let payload = ErrorPayload::new(code, error.to_string());
    if code.is_retryable() {
        payload.with_retry_after_ms(1000)
    } else {
        payload
    }
}

/// Hands every finalized learner turn to the scoring queue exactly once.
/// The job index comes from the persisted wav name so per-turn and
/// session-end submissions de-duplicate to the same key.
fn submit_finalized_turns(
    feedback: &FeedbackSink,
    session_id: &str,
    language: &str,
    history: &[Turn],
) {
    let mut ordinal = 0usize;
    for turn in history {
        if turn.role() != Role::Learner {
            continue;
        }
        ordinal += 1;
        let Some(audio_path) = turn.audio_path() else {
            continue;
        };
        let turn_index = std::path::Path::new(audio_path)
            .file_stem()
            .and_then(|stem| stem.to_string_lossy().parse::<usize>().ok())
            .unwrap_or(ordinal);
        feedback.submit(&ScoringJob {
            session_id: session_id.to_string(),
            turn_index,
            audio_path: audio_path.to_string(),
            reference_text: turn.text().to_string(),
            language: language.to_string(),
            scenario_step: turn.scenario_step().map(str::to_string),
            submitted_at: Utc::now(),
        });
    }
}

struct TurnContext {
    deps: SessionDeps,
    dialogue: Arc<Mutex<DialogueManager>>,
    session_id: String,
    turn_index: usize,
    session_start: DateTime<Utc>,
    language: String,
    voice_id: String,
    out: OutboundHandle,
    phase: SharedPhase,
    interrupt_ack: bool,
    feedback_per_turn: bool,
}

/// One conversational turn: ASR → dialogue/LLM → TTS. Runs as its own task
/// so the supervisor keeps evaluating inbound audio for barge-in.
async fn run_turn(ctx: TurnContext, segment: SpeechSegment, cancel: CancellationToken) -> TurnOutcome {
    let epoch = ctx.out.current_epoch();

    let transcript = match ctx
        .deps
        .asr
        .transcribe(&segment, &ctx.language, cancel.clone())
        .await
    {
        Ok(t) => t,
        Err(CoreError::SegmentTooSmall { duration_ms, bytes }) => {
            tracing::debug!(
                session = %ctx.session_id,
                duration_ms,
                bytes,
                "segment below asr minimum, dropped"
            );
            return TurnOutcome::SegmentDropped;
        }
        Err(CoreError::Cancelled) => return TurnOutcome::Cancelled,
        Err(e) => return TurnOutcome::Failed(e),
    };

    if transcript.text.trim().is_empty() {
        tracing::debug!(session = %ctx.session_id, "empty transcription, dropped");
        return TurnOutcome::SegmentDropped;
    }

    tracing::info!(
        session = %ctx.session_id,
        turn = ctx.turn_index,
        text = %transcript.text,
        "learner said"
    );

    let frame = ServerFrame::AsrFinal {
        epoch,
        text: transcript.text.clone(),
        confidence: transcript.confidence,
        language: transcript.language.clone(),
    };
    if ctx.out.frame(frame).await.is_err() {
        return TurnOutcome::Failed(CoreError::Transport("outbound writer gone".into()));
    }

    let audio_path = match ctx.deps.feedback.save_segment_audio(
        &ctx.session_id,
        ctx.turn_index,
        &segment.pcm,
    ) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::error!(session = %ctx.session_id, error = %e, "failed to persist segment audio");
            None
        }
    };

    let speech_start = ctx.session_start + chrono::Duration::milliseconds(segment.start_ms as i64);
    let speech_end = ctx.session_start + chrono::Duration::milliseconds(segment.end_ms as i64);
    let mut learner_turn =
        Turn::learner(&transcript.text).with_speech_window(speech_start, speech_end);
    if let Some(ref path) = audio_path {
        learner_turn = learner_turn.with_audio_path(path.to_string_lossy());
    }

    ctx.phase.set(Phase::ResponseGen);
    let reply = {
        let mut guard = ctx.dialogue.lock().await;
        if ctx.interrupt_ack {
            guard.note_interruption();
        }
        match guard.take_turn(learner_turn, &ctx.out, cancel.clone()).await {
            Ok(reply) => reply,
            Err(CoreError::Cancelled) => return TurnOutcome::Cancelled,
            Err(e) => return TurnOutcome::Failed(e),
        }
    };

    if ctx.feedback_per_turn {
        if let Some(ref path) = audio_path {
            ctx.deps.feedback.submit(&ScoringJob {
                session_id: ctx.session_id.clone(),
                turn_index: ctx.turn_index,
                audio_path: path.to_string_lossy().into_owned(),
                reference_text: transcript.text.clone(),
                language: ctx.language.clone(),
                scenario_step: None,
                submitted_at: Utc::now(),
            });
        }
    }

    ctx.phase.set(Phase::ResponseSpeak);
    match ctx
        .deps
        .tts
        .speak(
            &reply.text,
            &ctx.language,
            &ctx.voice_id,
            reply.emotion,
            &ctx.out,
            &cancel,
        )
        .await
    {
        Ok(SpeakOutcome::Interrupted) => return TurnOutcome::Cancelled,
        Ok(SpeakOutcome::Degraded) => {
            tracing::warn!(session = %ctx.session_id, "utterance synthesis failed entirely");
        }
        Ok(SpeakOutcome::Completed { units, cache_hits }) => {
            tracing::debug!(
                session = %ctx.session_id,
                units,
                cache_hits,
                "utterance streamed"
            );
        }
        Err(CoreError::Cancelled) => return TurnOutcome::Cancelled,
        Err(e) => return TurnOutcome::Failed(e),
    }

    let frame = ServerFrame::TurnEmotion {
        epoch,
        label: reply.emotion,
    };
    if ctx.out.frame(frame).await.is_err() {
        return TurnOutcome::Failed(CoreError::Transport("outbound writer gone".into()));
    }

    TurnOutcome::Completed
}

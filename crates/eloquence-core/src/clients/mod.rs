//! Capability contracts for the external inference services and their HTTP
//! implementations. The orchestrator depends on the traits only; each
//! backend is one implementation behind the same contract.

pub mod asr;
pub mod llm;
pub mod pool;
pub mod tts;

use crate::error::CoreResult;
use crate::vad::SpeechSegment;
use async_trait::async_trait;
use eloquence_types::Emotion;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use pool::ServicePool;

/// One word of a transcript with its timing window in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f32,
    pub end: f32,
}

/// Result of transcribing one speech segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default)]
    pub words: Vec<WordTiming>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Speech-to-text over a completed segment. Stateless per call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcribe: Send + Sync {
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
        language: &str,
        cancel: CancellationToken,
    ) -> CoreResult<Transcript>;
}

/// Role of a chat message sent to the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request for one streaming generation.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub language: String,
}

/// Token accounting reported at the end of a generation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Items of the generation stream.
#[derive(Debug)]
pub enum LlmEvent {
    Delta(String),
    Done(LlmUsage),
    Failed(crate::error::CoreError),
}

/// Streaming chat completion. At most one in-flight generation per session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Generate: Send + Sync {
    /// Starts a generation and returns the delta stream. Setting `cancel`
    /// stops emission within 100 ms and closes the connection.
    async fn generate(
        &self,
        request: LlmRequest,
        cancel: CancellationToken,
    ) -> CoreResult<mpsc::Receiver<LlmEvent>>;
}

/// Request for one synthesis unit.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsRequest {
    pub text: String,
    pub language: String,
    pub voice_id: String,
    pub emotion: Emotion,
}

/// Text-to-speech for one utterance unit; returns the complete PCM16 payload
/// which the pipeline re-chunks for dispatch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Synthesize: Send + Sync {
    async fn synthesize(&self, request: &TtsRequest, cancel: CancellationToken)
        -> CoreResult<Vec<u8>>;
}

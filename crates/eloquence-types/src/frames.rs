//! Control frames exchanged on the audio transport.
//!
//! Text frames are JSON, tagged by `type`; raw audio travels as binary
//! messages (see [`crate::audio::AudioChunk`]). Every outbound control frame
//! carries the interruption epoch it was produced under; the transport drops
//! any frame whose epoch is older than the session's current epoch.

use crate::emotion::Emotion;
use crate::error::ErrorPayload;
use serde::{Deserialize, Serialize};

fn zero() -> u64 {
    0
}

/// Messages the client sends on the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Begin the audio phase of the session.
    StartStream {
        #[serde(default = "zero")]
        epoch: u64,
    },
    /// End the audio phase and the session.
    StopStream {
        #[serde(default = "zero")]
        epoch: u64,
    },
    /// Client-side interruption hint (e.g. a tap on the stop button).
    Cancel {
        #[serde(default = "zero")]
        epoch: u64,
    },
    /// Liveness probe; also acknowledges a server heartbeat.
    Ping {
        #[serde(default = "zero")]
        epoch: u64,
    },
}

/// Messages the orchestrator sends on the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    StreamStarted {
        epoch: u64,
        session_id: String,
    },
    AsrPartial {
        epoch: u64,
        text: String,
    },
    AsrFinal {
        epoch: u64,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    AgentTextPartial {
        epoch: u64,
        text: String,
    },
    AgentTextFinal {
        epoch: u64,
        text: String,
    },
    /// Playback must stop immediately; everything after this frame belongs
    /// to a newer epoch.
    TtsStop {
        epoch: u64,
    },
    /// A synthesis unit failed; playback continues with the next unit.
    TtsFallback {
        epoch: u64,
        unit: String,
    },
    TurnEmotion {
        epoch: u64,
        label: Emotion,
    },
    Error {
        epoch: u64,
        #[serde(flatten)]
        payload: ErrorPayload,
    },
    Heartbeat {
        epoch: u64,
    },
}

impl ServerFrame {
    /// The interruption epoch this frame was produced under.
    pub fn epoch(&self) -> u64 {
        match self {
            ServerFrame::StreamStarted { epoch, .. }
            | ServerFrame::AsrPartial { epoch, .. }
            | ServerFrame::AsrFinal { epoch, .. }
            | ServerFrame::AgentTextPartial { epoch, .. }
            | ServerFrame::AgentTextFinal { epoch, .. }
            | ServerFrame::TtsStop { epoch }
            | ServerFrame::TtsFallback { epoch, .. }
            | ServerFrame::TurnEmotion { epoch, .. }
            | ServerFrame::Error { epoch, .. }
            | ServerFrame::Heartbeat { epoch } => *epoch,
        }
    }

    /// Frames that must bypass the stale-epoch filter.
    ///
    /// `tts_stop` and `error` are produced at the moment the epoch advances
    /// and must always reach the client; heartbeats are epoch-agnostic.
    pub fn bypasses_epoch_filter(&self) -> bool {
        matches!(
            self,
            ServerFrame::TtsStop { .. } | ServerFrame::Error { .. } | ServerFrame::Heartbeat { .. }
        )
    }
}

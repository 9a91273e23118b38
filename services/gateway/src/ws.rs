//! WebSocket audio transport: bridges one client connection onto the
//! session supervisor's inbound channel and implements the outbound sink.
//!
//! Text frames are JSON control messages, binary frames are raw audio,
//! disambiguated by the WebSocket frame type.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use eloquence_core::error::{CoreError, CoreResult};
use eloquence_core::session::{Session, SessionConfig, SessionDeps, SessionParams};
use eloquence_core::transport::{Inbound, TransportSink};
use eloquence_core::vad::{EnergyDetector, VadConfig};
use eloquence_core::dialogue::DialogueConfig;
use eloquence_types::audio::AudioChunk;
use eloquence_types::{ClientFrame, ServerFrame};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: String,
}

/// Write half of the WebSocket behind the core's transport contract.
struct WsSink {
    writer: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait::async_trait]
impl TransportSink for WsSink {
    async fn send_frame(&self, frame: &ServerFrame) -> CoreResult<()> {
        let text = serde_json::to_string(frame)?;
        self.writer
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))
    }

    async fn send_audio(&self, chunk: &AudioChunk) -> CoreResult<()> {
        self.writer
            .lock()
            .await
            .send(Message::Binary(chunk.encode()))
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))
    }

    async fn close(&self) -> CoreResult<()> {
        self.writer
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))
    }
}

/// `GET /ws/{session_id}?token=` — upgrades the transport for a session
/// allocated through `POST /sessions`.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    if !state.config.origin_allowed(origin) {
        tracing::warn!(?origin, "transport origin rejected");
        return StatusCode::FORBIDDEN.into_response();
    }

    let Some((_, pending)) = state.pending.remove(&session_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if pending.token != query.token {
        // The allocation is consumed either way; a stolen session id must
        // not stay connectable.
        return StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(state, session_id, pending, socket))
}

async fn handle_socket(
    state: AppState,
    session_id: String,
    pending: crate::state::PendingSession,
    socket: WebSocket,
) {
    tracing::info!(session = %session_id, "transport connected");
    let (writer, mut reader) = socket.split();
    let sink = Arc::new(WsSink {
        writer: Mutex::new(writer),
    });

    let (inbound_tx, inbound_rx) = Session::inbound_channel();

    let params = SessionParams {
        session_id: session_id.clone(),
        learner_id: pending.learner_id,
        language: pending.language,
        agent: pending.agent,
        scenario: pending.scenario,
        config: SessionConfig::default(),
        dialogue: DialogueConfig {
            temperature: state.config.llm_temperature,
            max_tokens: state.config.llm_max_tokens,
            ..DialogueConfig::default()
        },
        vad: VadConfig {
            threshold: state.config.vad_threshold,
            min_silence_ms: state.config.vad_min_silence_ms,
            speech_pad_ms: state.config.vad_speech_pad_ms,
            ..VadConfig::default()
        },
    };

    let supervisor = Session::spawn(
        params,
        state.deps.clone(),
        state.registry.clone(),
        Box::new(EnergyDetector::default()),
        inbound_rx,
        sink,
    );

    // Read loop: translate WebSocket messages into session inbound items.
    while let Some(message) = reader.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                tracing::info!(session = %session_id, error = %e, "transport read failed");
                break;
            }
        };
        match message {
            Message::Binary(bytes) => {
                // Bounded channel: a full queue means the supervisor fell
                // behind; it detects the backlog and closes the session.
                if inbound_tx.try_send(Inbound::Audio(bytes)).is_err() {
                    tracing::warn!(session = %session_id, "inbound audio queue full, dropping frame");
                }
            }
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => {
                    if inbound_tx.send(Inbound::Control(frame)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(session = %session_id, error = %e, "unparseable control frame");
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let _ = inbound_tx.send(Inbound::Closed).await;
    let _ = supervisor.await;
    tracing::info!(session = %session_id, "transport disconnected");
}

//! HTTP control plane: session lifecycle, feedback retrieval and the
//! scenario catalog.

use crate::auth::AuthRejection;
use crate::state::{AppState, PendingSession};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub scenario_id: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub agent_profile_id: Option<String>,
    #[serde(default)]
    pub is_multi_agent: bool,
}

fn default_language() -> String {
    "fr".to_string()
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub room_name: String,
    pub token: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    pub status: &'static str,
    pub not_found: bool,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackQuery {
    #[serde(default)]
    pub segment_id: Option<usize>,
    #[serde(default)]
    pub feedback_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub language: String,
}

pub(crate) fn auth_error(rejection: AuthRejection) -> Response {
    let (status, message) = match rejection {
        AuthRejection::InvalidKey => (StatusCode::UNAUTHORIZED, "invalid API key"),
        AuthRejection::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded"),
        AuthRejection::Blocked => (StatusCode::TOO_MANY_REQUESTS, "temporarily blocked"),
    };
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

pub(crate) fn require_api_key(
    state: &AppState,
    addr: SocketAddr,
    headers: &HeaderMap,
) -> Result<(), Response> {
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    state
        .auth
        .check(addr.ip(), provided)
        .map_err(auth_error)
}

/// `POST /sessions` — allocates a session and its transport credentials.
/// The session itself starts when the client connects to the returned URL.
pub async fn create_session(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<CreateSessionRequest>,
) -> Response {
    if let Err(rejection) = require_api_key(&state, addr, &headers) {
        return rejection;
    }

    if request.user_id.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": "user_id must not be empty" })),
        )
            .into_response();
    }

    let scenario = match &request.scenario_id {
        Some(id) => match state.scenarios.get(id) {
            Some(template) => Some(template.clone()),
            None => {
                return (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({ "error": format!("unknown scenario '{id}'") })),
                )
                    .into_response();
            }
        },
        None => None,
    };

    let agent = match &request.agent_profile_id {
        Some(id) => match state.agents.get(id) {
            Some(profile) => profile.clone(),
            None => {
                return (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({ "error": format!("unknown agent profile '{id}'") })),
                )
                    .into_response();
            }
        },
        None => state.default_agent(),
    };

    if request.is_multi_agent {
        tracing::warn!("multi-agent sessions not supported yet, running single-agent");
    }

    let session_id = Uuid::new_v4().to_string();
    let token = Uuid::new_v4().to_string();
    let room_name = format!("eloquence-{session_id}");
    let url = format!("/ws/{session_id}");

    state.pending.insert(
        session_id.clone(),
        PendingSession {
            token: token.clone(),
            learner_id: request.user_id,
            language: request.language,
            scenario,
            agent,
        },
    );
    tracing::info!(session = %session_id, "session allocated");

    Json(CreateSessionResponse {
        session_id,
        room_name,
        token,
        url,
    })
    .into_response()
}

/// `DELETE /sessions/{id}` — terminates a session. Idempotent: ending an
/// unknown or already-ended session succeeds with `not_found: true`.
pub async fn end_session(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response {
    if let Err(rejection) = require_api_key(&state, addr, &headers) {
        return rejection;
    }

    let was_pending = state.pending.remove(&session_id).is_some();
    let was_live = state.registry.end(&session_id).await;

    Json(EndSessionResponse {
        status: "success",
        not_found: !(was_pending || was_live),
    })
    .into_response()
}

/// `GET /sessions/{id}/feedback` — returns completed scoring artifacts.
pub async fn session_feedback(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<FeedbackQuery>,
) -> Response {
    if let Err(rejection) = require_api_key(&state, addr, &headers) {
        return rejection;
    }

    match query.segment_id {
        Some(turn_index) => match state.deps.feedback.load_artifact(&session_id, turn_index) {
            Ok(mut artifact) => {
                if let (Some(kind), Some(object)) =
                    (&query.feedback_type, artifact.as_object_mut())
                {
                    object.retain(|key, _| key == kind || key == "score");
                }
                Json(artifact).into_response()
            }
            Err(_) => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "feedback not ready" })),
            )
                .into_response(),
        },
        None => {
            let jobs = state.deps.feedback.queued_jobs(&session_id);
            Json(serde_json::json!({
                "session_id": session_id,
                "pending_jobs": jobs.len(),
            }))
            .into_response()
        }
    }
}

/// `GET /scenarios` — catalog of loaded scenario templates.
pub async fn list_scenarios(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_api_key(&state, addr, &headers) {
        return rejection;
    }

    let mut summaries: Vec<ScenarioSummary> = state
        .scenarios
        .values()
        .map(|template| ScenarioSummary {
            id: template.id().to_string(),
            name: template.name().to_string(),
            description: template.description().to_string(),
            language: template.language().to_string(),
        })
        .collect();
    summaries.sort_by(|a, b| a.id.cmp(&b.id));
    Json(summaries).into_response()
}

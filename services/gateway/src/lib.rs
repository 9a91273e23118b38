//! Eloquence gateway: HTTP control plane and WebSocket audio transport in
//! front of the orchestrator core.

pub mod auth;
pub mod config;
pub mod routes;
pub mod state;
pub mod ws;

use axum::routing::{delete, get, post};
use axum::Router;
use state::AppState;
use tower_http::cors::{Any, CorsLayer};

/// Builds the full application router.
pub fn build_router(state: AppState) -> Router {
    // The browser-facing CORS layer; transport origins are checked again at
    // upgrade time against ALLOWED_ORIGINS.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/sessions", post(routes::create_session))
        .route("/sessions/:id", delete(routes::end_session))
        .route("/sessions/:id/feedback", get(routes::session_feedback))
        .route("/scenarios", get(routes::list_scenarios))
        .route("/ws/:id", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

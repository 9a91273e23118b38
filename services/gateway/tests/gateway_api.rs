//! Gateway smoke tests: session lifecycle over HTTP and the WebSocket
//! transport handshake against a real listener.

use dashmap::DashMap;
use eloquence_core::cache::TtsCache;
use eloquence_core::clients::asr::HttpAsrClient;
use eloquence_core::clients::llm::HttpLlmClient;
use eloquence_core::clients::tts::HttpTtsClient;
use eloquence_core::clients::ServicePool;
use eloquence_core::feedback::FeedbackSink;
use eloquence_core::session::{SessionDeps, SessionRegistry};
use eloquence_core::speech::{TtsPipeline, TtsPipelineConfig};
use eloquence_gateway::auth::ApiKeyAuth;
use eloquence_gateway::config::Config;
use eloquence_gateway::state::AppState;
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const API_KEY: &str = "test-key";

fn test_config() -> Config {
    // Keep the constructor honest: go through the environment once.
    std::env::set_var("API_KEY", API_KEY);
    let mut config = Config::from_env().expect("config");
    config.allowed_origins = vec!["*".to_string()];
    config.max_requests_per_minute = 10_000;
    config
}

async fn serve() -> (SocketAddr, AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();

    let cache = Arc::new(TtsCache::new());
    let tts = Arc::new(TtsPipeline::new(
        Arc::new(HttpTtsClient::new(
            "http://127.0.0.1:1/api/tts",
            ServicePool::new("tts", 2),
        )),
        cache,
        TtsPipelineConfig::default(),
    ));
    let deps = SessionDeps {
        asr: Arc::new(HttpAsrClient::new(
            "http://127.0.0.1:1/asr",
            ServicePool::new("asr", 2),
        )),
        llm: Arc::new(HttpLlmClient::new(
            "http://127.0.0.1:1/v1/chat/completions",
            "test-model",
            ServicePool::new("llm", 2),
        )),
        tts,
        feedback: Arc::new(FeedbackSink::new(
            dir.path().join("audio"),
            dir.path().join("feedback"),
        )),
    };

    let scenarios = HashMap::from([(
        "conversation".to_string(),
        Arc::new(
            serde_json::from_str::<eloquence_types::scenario::ScenarioTemplate>(
                r#"{
                    "id": "conversation",
                    "name": "Conversation libre",
                    "steps": {"ouverture": {"name": "Ouverture", "prompt_template": "Lance la conversation.", "is_final": true}},
                    "first_step": "ouverture"
                }"#,
            )
            .unwrap(),
        ),
    )]);

    let auth = Arc::new(ApiKeyAuth::new(
        SecretString::from(API_KEY.to_string()),
        config.max_requests_per_minute,
    ));
    let state = AppState {
        config: Arc::new(config),
        auth,
        registry: Arc::new(SessionRegistry::new()),
        deps,
        scenarios: Arc::new(scenarios),
        agents: Arc::new(HashMap::new()),
        pending: Arc::new(DashMap::new()),
    };

    let app = eloquence_gateway::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state, dir)
}

async fn create_session(addr: SocketAddr) -> serde_json::Value {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/sessions"))
        .header("X-API-Key", API_KEY)
        .json(&serde_json::json!({ "user_id": "learner-1", "language": "fr" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_create_session_requires_api_key() {
    let (addr, _state, _dir) = serve().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/sessions"))
        .json(&serde_json::json!({ "user_id": "learner-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let body = create_session(addr).await;
    assert!(body["session_id"].is_string());
    assert!(body["token"].is_string());
    assert!(body["room_name"]
        .as_str()
        .unwrap()
        .starts_with("eloquence-"));
}

#[tokio::test]
async fn test_unknown_scenario_is_404() {
    let (addr, _state, _dir) = serve().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/sessions"))
        .header("X-API-Key", API_KEY)
        .json(&serde_json::json!({ "user_id": "u", "scenario_id": "absent" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_delete_session_is_idempotent() {
    let (addr, _state, _dir) = serve().await;
    let client = reqwest::Client::new();

    let body = create_session(addr).await;
    let session_id = body["session_id"].as_str().unwrap();

    let first: serde_json::Value = client
        .delete(format!("http://{addr}/sessions/{session_id}"))
        .header("X-API-Key", API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["status"], "success");
    assert_eq!(first["not_found"], false);

    let second: serde_json::Value = client
        .delete(format!("http://{addr}/sessions/{session_id}"))
        .header("X-API-Key", API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["status"], "success");
    assert_eq!(second["not_found"], true);
}

#[tokio::test]
async fn test_scenario_catalog() {
    let (addr, _state, _dir) = serve().await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("http://{addr}/scenarios"))
        .header("X-API-Key", API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body[0]["id"], "conversation");
}

#[tokio::test]
async fn test_ws_handshake_and_stream_start() {
    use tokio_tungstenite::tungstenite::Message;

    let (addr, state, _dir) = serve().await;
    let body = create_session(addr).await;
    let session_id = body["session_id"].as_str().unwrap();
    let token = body["token"].as_str().unwrap();

    let (mut socket, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/ws/{session_id}?token={token}"
    ))
    .await
    .expect("websocket connect");

    socket
        .send(Message::Text(r#"{"type":"start_stream"}"#.to_string()))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("frame before timeout")
        .expect("stream open")
        .expect("read ok");
    let text = frame.into_text().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["type"], "stream_started");
    assert_eq!(parsed["session_id"], session_id);
    assert!(state.registry.contains(session_id));

    socket
        .send(Message::Text(r#"{"type":"stop_stream"}"#.to_string()))
        .await
        .unwrap();

    // The server closes the transport once the session has ended.
    loop {
        match tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("close before timeout")
        {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
}

#[tokio::test]
async fn test_ws_with_wrong_token_is_rejected() {
    let (addr, _state, _dir) = serve().await;
    let body = create_session(addr).await;
    let session_id = body["session_id"].as_str().unwrap();

    let result = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/ws/{session_id}?token=wrong"
    ))
    .await;
    assert!(result.is_err(), "handshake must be refused");
}

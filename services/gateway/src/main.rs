use anyhow::Result;
use clap::Parser;
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
use eloquence_gateway::state::{self, AppState};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Per-service connection pool sizes.
const ASR_POOL_SIZE: usize = 8;
const LLM_POOL_SIZE: usize = 8;
const TTS_POOL_SIZE: usize = 8;

#[derive(Parser)]
#[command(name = "eloquence-gateway", about = "Eloquence voice-coaching gateway")]
struct Cli {
    /// Override the bind host from the environment.
    #[arg(long)]
    host: Option<String>,
    /// Override the bind port from the environment.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Cli::parse();
    let host = args.host.unwrap_or_else(|| config.host.clone());
    let port = args.port.unwrap_or(config.port);

    tracing::info!(
        cache_prefix = %config.tts_cache_prefix,
        "configuration loaded, starting gateway"
    );

    let cache = Arc::new(TtsCache::with_ttl(config.tts_cache_expiration));
    let tts_client = Arc::new(HttpTtsClient::new(
        config.tts_api_url.clone(),
        ServicePool::new("tts", TTS_POOL_SIZE),
    ));
    let tts = Arc::new(TtsPipeline::new(
        tts_client,
        cache,
        TtsPipelineConfig {
            use_cache: config.tts_use_cache,
            ..TtsPipelineConfig::default()
        },
    ));

    let deps = SessionDeps {
        asr: Arc::new(HttpAsrClient::new(
            config.asr_api_url.clone(),
            ServicePool::new("asr", ASR_POOL_SIZE),
        )),
        llm: Arc::new(
            HttpLlmClient::new(
                config.llm_local_api_url.clone(),
                config.llm_model_name.clone(),
                ServicePool::new("llm", LLM_POOL_SIZE),
            )
            .with_timeout(config.llm_timeout),
        ),
        tts,
        feedback: Arc::new(FeedbackSink::new(
            config.audio_storage_path.clone(),
            config.feedback_storage_path.clone(),
        )),
    };

    let scenarios = state::load_scenarios(Path::new(&config.scenario_dir));
    let agents = state::load_agents(Path::new(&config.agent_profile_dir));
    tracing::info!(
        scenarios = scenarios.len(),
        agents = agents.len(),
        "catalogs loaded"
    );

    let auth = Arc::new(ApiKeyAuth::new(
        config.api_key.clone(),
        config.max_requests_per_minute,
    ));

    let app_state = AppState {
        config: Arc::new(config),
        auth,
        registry: Arc::new(SessionRegistry::new()),
        deps,
        scenarios: Arc::new(scenarios),
        agents: Arc::new(agents),
        pending: Arc::new(DashMap::new()),
    };

    let app = eloquence_gateway::build_router(app_state);

    let addr = format!("{host}:{port}");
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c, shutting down");
    })
    .await?;

    Ok(())
}

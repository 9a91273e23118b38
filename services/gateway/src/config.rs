//! Gateway configuration.
//!
//! Everything is loaded from environment variables (a local `.env` file is
//! honored for development) into one shareable struct passed throughout the
//! service.

use secrecy::SecretString;
use std::env;
use std::time::Duration;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Holds all configuration loaded from the environment.
///
/// Recognized keys:
/// *   `API_KEY`: credential expected in the `X-API-Key` header. Required.
/// *   `ALLOWED_ORIGINS`: CSV of origins permitted to open the transport.
///     Defaults to `*`.
/// *   `MAX_REQUESTS_PER_MINUTE`: per-IP rate-limit ceiling. Default 60.
/// *   `VAD_THRESHOLD`, `VAD_MIN_SILENCE_DURATION_MS`, `VAD_SPEECH_PAD_MS`:
///     VAD gate tuning. Defaults 0.45 / 2000 / 400.
/// *   `LLM_TIMEOUT_S`, `LLM_MAX_MAX_TOKENS`, `LLM_TEMPERATURE`: LLM call
///     bounds. Defaults 30 / 512 / 0.7.
/// *   `LLM_MODEL_NAME`: model requested from the LLM server.
/// *   `TTS_USE_CACHE`, `TTS_CACHE_PREFIX`, `TTS_CACHE_EXPIRATION_S`:
///     cache behaviour. Defaults true / `tts_cache:` / 86400.
/// *   `ASR_API_URL`, `LLM_LOCAL_API_URL`, `TTS_API_URL`: service endpoints.
/// *   `AUDIO_STORAGE_PATH`, `FEEDBACK_STORAGE_PATH`: on-disk artifact roots.
/// *   `SCENARIO_DIR`, `AGENT_PROFILE_DIR`: JSON document directories.
///     Default `demos`.
/// *   `HOST`, `PORT`: bind address. Defaults 0.0.0.0:8000.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub api_key: SecretString,
    pub allowed_origins: Vec<String>,
    pub max_requests_per_minute: u32,

    pub vad_threshold: f32,
    pub vad_min_silence_ms: u64,
    pub vad_speech_pad_ms: u64,

    pub llm_timeout: Duration,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    pub llm_model_name: String,

    pub tts_use_cache: bool,
    pub tts_cache_prefix: String,
    pub tts_cache_expiration: Duration,

    pub asr_api_url: String,
    pub llm_local_api_url: String,
    pub tts_api_url: String,

    pub audio_storage_path: String,
    pub feedback_storage_path: String,
    pub scenario_dir: String,
    pub agent_profile_dir: String,
}

fn parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn string_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env if present; ignored in production containers.
        dotenvy::dotenv().ok();

        let api_key = env::var("API_KEY")
            .map_err(|_| ConfigError::MissingVar("API_KEY".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingVar("API_KEY".to_string()));
        }

        let allowed_origins = string_or("ALLOWED_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host: string_or("HOST", "0.0.0.0"),
            port: parsed("PORT", 8000u16)?,
            api_key: SecretString::from(api_key),
            allowed_origins,
            max_requests_per_minute: parsed("MAX_REQUESTS_PER_MINUTE", 60u32)?,

            vad_threshold: parsed("VAD_THRESHOLD", 0.45f32)?,
            vad_min_silence_ms: parsed("VAD_MIN_SILENCE_DURATION_MS", 2000u64)?,
            vad_speech_pad_ms: parsed("VAD_SPEECH_PAD_MS", 400u64)?,

            llm_timeout: Duration::from_secs(parsed("LLM_TIMEOUT_S", 30u64)?),
            llm_max_tokens: parsed("LLM_MAX_MAX_TOKENS", 512u32)?,
            llm_temperature: parsed("LLM_TEMPERATURE", 0.7f32)?,
            llm_model_name: string_or("LLM_MODEL_NAME", "mistral-nemo-instruct-2407"),

            tts_use_cache: parsed("TTS_USE_CACHE", true)?,
            tts_cache_prefix: string_or("TTS_CACHE_PREFIX", "tts_cache:"),
            tts_cache_expiration: Duration::from_secs(parsed("TTS_CACHE_EXPIRATION_S", 86_400u64)?),

            asr_api_url: string_or("ASR_API_URL", "http://localhost:8001/asr"),
            llm_local_api_url: string_or(
                "LLM_LOCAL_API_URL",
                "http://localhost:8002/v1/chat/completions",
            ),
            tts_api_url: string_or("TTS_API_URL", "http://localhost:5002/api/tts"),

            audio_storage_path: string_or("AUDIO_STORAGE_PATH", "./data/audio"),
            feedback_storage_path: string_or("FEEDBACK_STORAGE_PATH", "./data/feedback"),
            scenario_dir: string_or("SCENARIO_DIR", "demos"),
            agent_profile_dir: string_or("AGENT_PROFILE_DIR", "demos"),
        })
    }

    /// Whether `origin` may open the audio transport.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.iter().any(|o| o == "*") {
            return true;
        }
        match origin {
            Some(origin) => self.allowed_origins.iter().any(|o| o == origin),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_wildcard_allows_everything() {
        let mut config = test_config();
        config.allowed_origins = vec!["*".to_string()];
        assert!(config.origin_allowed(Some("https://anywhere.example")));
        assert!(config.origin_allowed(None));
    }

    #[test]
    fn test_origin_list_is_exact_match() {
        let mut config = test_config();
        config.allowed_origins = vec!["https://app.eloquence.fr".to_string()];
        assert!(config.origin_allowed(Some("https://app.eloquence.fr")));
        assert!(!config.origin_allowed(Some("https://evil.example")));
        assert!(!config.origin_allowed(None));
    }

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 8000,
            api_key: SecretString::from("k".to_string()),
            allowed_origins: vec![],
            max_requests_per_minute: 60,
            vad_threshold: 0.45,
            vad_min_silence_ms: 2000,
            vad_speech_pad_ms: 400,
            llm_timeout: Duration::from_secs(30),
            llm_max_tokens: 512,
            llm_temperature: 0.7,
            llm_model_name: "m".into(),
            tts_use_cache: true,
            tts_cache_prefix: "tts_cache:".into(),
            tts_cache_expiration: Duration::from_secs(86_400),
            asr_api_url: "http://localhost:8001/asr".into(),
            llm_local_api_url: "http://localhost:8002".into(),
            tts_api_url: "http://localhost:5002".into(),
            audio_storage_path: "./data/audio".into(),
            feedback_storage_path: "./data/feedback".into(),
            scenario_dir: "demos".into(),
            agent_profile_dir: "demos".into(),
        }
    }
}

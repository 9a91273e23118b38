//! HTTP client for the speech-synthesis service.

use super::{ServicePool, Synthesize, TtsRequest};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct HttpTtsClient {
    http: reqwest::Client,
    api_url: String,
    pool: ServicePool,
}

#[derive(serde::Serialize)]
struct TtsRequestBody<'a> {
    text: &'a str,
    language: &'a str,
    speaker_id: &'a str,
    emotion: &'a str,
    sample_rate: u32,
}

impl HttpTtsClient {
    pub fn new(api_url: impl Into<String>, pool: ServicePool) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            pool,
        }
    }

    async fn call(&self, request: &TtsRequest) -> CoreResult<Vec<u8>> {
        let body = TtsRequestBody {
            text: &request.text,
            language: &request.language,
            speaker_id: &request.voice_id,
            emotion: request.emotion.as_str(),
            sample_rate: eloquence_types::audio::SAMPLE_RATE,
        };

        let response = self
            .http
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::upstream("tts", e.to_string()))?
            .error_for_status()
            .map_err(|e| CoreError::upstream("tts", e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::upstream("tts", e.to_string()))?;

        if bytes.is_empty() {
            return Err(CoreError::upstream("tts", "empty audio payload"));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Synthesize for HttpTtsClient {
    async fn synthesize(
        &self,
        request: &TtsRequest,
        cancel: CancellationToken,
    ) -> CoreResult<Vec<u8>> {
        let _permit = self.pool.acquire().await?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            result = self.call(request) => result,
        }
    }
}

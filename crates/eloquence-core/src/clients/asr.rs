//! HTTP client for the external transcription service.

use super::{ServicePool, Transcribe, Transcript};
use crate::error::{CoreError, CoreResult};
use crate::vad::SpeechSegment;
use async_trait::async_trait;
use eloquence_audio::pcm;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Segments shorter than this fail fast without an RPC.
const MIN_SEGMENT_MS: u64 = 200;
const MIN_SEGMENT_BYTES: usize = 400;

/// Backoff before the single transport-level retry.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

pub struct HttpAsrClient {
    http: reqwest::Client,
    api_url: String,
    pool: ServicePool,
}

#[derive(serde::Serialize)]
struct AsrRequestBody<'a> {
    audio: String,
    language: &'a str,
    sample_rate: u32,
}

impl HttpAsrClient {
    pub fn new(api_url: impl Into<String>, pool: ServicePool) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            pool,
        }
    }

    async fn call_once(&self, body: &AsrRequestBody<'_>) -> Result<Transcript, reqwest::Error> {
        let response = self
            .http
            .post(&self.api_url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        response.json::<Transcript>().await
    }

    async fn call_with_retry(&self, body: &AsrRequestBody<'_>) -> CoreResult<Transcript> {
        match self.call_once(body).await {
            Ok(transcript) => Ok(transcript),
            Err(e) if is_transport_error(&e) => {
                tracing::warn!(error = %e, "asr transport error, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.call_once(body)
                    .await
                    .map_err(|e| CoreError::upstream("asr", e.to_string()))
            }
            Err(e) => Err(CoreError::upstream("asr", e.to_string())),
        }
    }
}

/// Connection-level failures are retried once; anything the transcription
/// layer reported (an HTTP status) surfaces immediately.
fn is_transport_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || (e.is_request() && e.status().is_none())
}

#[async_trait]
impl Transcribe for HttpAsrClient {
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
        language: &str,
        cancel: CancellationToken,
    ) -> CoreResult<Transcript> {
        let duration_ms = segment.duration_ms();
        if duration_ms < MIN_SEGMENT_MS || segment.pcm.len() < MIN_SEGMENT_BYTES {
            return Err(CoreError::SegmentTooSmall {
                duration_ms,
                bytes: segment.pcm.len(),
            });
        }

        let _permit = self.pool.acquire().await?;

        let body = AsrRequestBody {
            audio: pcm::encode_base64(&segment.pcm),
            language,
            sample_rate: eloquence_types::audio::SAMPLE_RATE,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            result = self.call_with_retry(&body) => result,
        }
    }
}

//! Streaming HTTP client for the dialogue LLM.
//!
//! Speaks the OpenAI-compatible chat-completions protocol with `stream`
//! enabled and re-emits SSE deltas on a channel. The whole response is
//! bounded by a wall-clock timeout; text already streamed before a timeout
//! is preserved by the consumer as a degraded turn.

use super::{Generate, LlmEvent, LlmRequest, LlmUsage, ServicePool};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct HttpLlmClient {
    http: reqwest::Client,
    api_url: String,
    model: String,
    api_key: Option<String>,
    pool: ServicePool,
    timeout: Duration,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(Debug, serde::Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: DeltaBody,
}

#[derive(Debug, Default, serde::Deserialize)]
struct DeltaBody {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// One parsed item of the SSE stream.
#[derive(Debug, PartialEq)]
enum SseItem {
    Delta(String),
    Usage(u32, u32),
    Done,
    Skip,
}

/// Parses a single SSE line (`data: {...}` or `data: [DONE]`).
fn parse_sse_line(line: &str) -> SseItem {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data: ") else {
        return SseItem::Skip;
    };
    if data == "[DONE]" {
        return SseItem::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            if let Some(usage) = chunk.usage {
                return SseItem::Usage(usage.prompt_tokens, usage.completion_tokens);
            }
            match chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.clone())
                .filter(|c| !c.is_empty())
            {
                Some(content) => SseItem::Delta(content),
                None => SseItem::Skip,
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, line = %data, "skipping unparseable sse chunk");
            SseItem::Skip
        }
    }
}

impl HttpLlmClient {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, pool: ServicePool) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            model: model.into(),
            api_key: None,
            pool,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request_body(&self, request: &LlmRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        })
    }
}

#[async_trait]
impl Generate for HttpLlmClient {
    async fn generate(
        &self,
        request: LlmRequest,
        cancel: CancellationToken,
    ) -> CoreResult<mpsc::Receiver<LlmEvent>> {
        let permit = self.pool.acquire().await?;

        let mut builder = self
            .http
            .post(&self.api_url)
            .timeout(self.timeout)
            .json(&self.request_body(&request));
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let timeout = self.timeout;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            // The pool slot is held for the lifetime of the stream.
            let _permit = permit;
            let deadline = tokio::time::Instant::now() + timeout;

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = tx.send(LlmEvent::Failed(CoreError::Cancelled)).await;
                    return;
                }
                result = builder.send() => result,
            };

            let response = match response.and_then(|r| r.error_for_status()) {
                Ok(r) => r,
                Err(e) => {
                    let event = if e.is_timeout() {
                        LlmEvent::Failed(CoreError::Timeout {
                            service: "llm",
                            elapsed_ms: timeout.as_millis() as u64,
                        })
                    } else {
                        LlmEvent::Failed(CoreError::upstream("llm", e.to_string()))
                    };
                    let _ = tx.send(event).await;
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut usage = LlmUsage::default();

            loop {
                let bytes = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let _ = tx.send(LlmEvent::Failed(CoreError::Cancelled)).await;
                        return;
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        let _ = tx.send(LlmEvent::Failed(CoreError::Timeout {
                            service: "llm",
                            elapsed_ms: timeout.as_millis() as u64,
                        })).await;
                        return;
                    }
                    next = stream.next() => next,
                };

                let Some(bytes) = bytes else { break };
                let bytes = match bytes {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(LlmEvent::Failed(CoreError::upstream("llm", e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].to_string();
                    buffer.drain(..=newline);
                    match parse_sse_line(&line) {
                        SseItem::Delta(content) => {
                            if tx.send(LlmEvent::Delta(content)).await.is_err() {
                                return;
                            }
                        }
                        SseItem::Usage(prompt, completion) => {
                            usage = LlmUsage {
                                prompt_tokens: prompt,
                                completion_tokens: completion,
                            };
                        }
                        SseItem::Done => {
                            let _ = tx.send(LlmEvent::Done(usage)).await;
                            return;
                        }
                        SseItem::Skip => {}
                    }
                }
            }

            // Stream ended without an explicit [DONE].
            let _ = tx.send(LlmEvent::Done(usage)).await;
        });

        Ok(rx)
    }
}

//! SSE streaming LLM adapter
//!
//! Speaks the OpenAI-compatible chat completion protocol with
//! `stream: true`, forwarding text deltas over a bounded channel.
//! Dropping the receiver cancels the generation: the next forward fails
//! and the read loop releases the connection.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use voiceline_config::LlmProviderConfig;
use voiceline_core::{ChatRequest, Error, LanguageModel, Result, StreamChunk};

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [voiceline_core::ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one SSE line.
///
/// Non-data lines, keep-alives and unparsable payloads yield `None`;
/// the `[DONE]` sentinel and a finish reason terminate the stream.
fn parse_sse_line(line: &str) -> Option<SseItem> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseItem::Done);
    }
    match serde_json::from_str::<WireChunk>(data) {
        Ok(chunk) => {
            let choice = chunk.choices.into_iter().next()?;
            if choice.finish_reason.is_some() {
                return Some(SseItem::Done);
            }
            choice.delta.content.map(SseItem::Delta)
        }
        Err(e) => {
            tracing::debug!(error = %e, "skipping unparsable SSE payload");
            None
        }
    }
}

enum SseItem {
    Delta(String),
    Done,
}

/// Streaming chat-completion backend.
pub struct SseLlm {
    client: reqwest::Client,
    config: LlmProviderConfig,
}

impl SseLlm {
    pub fn new(config: LlmProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::transient("llm", format!("client build failed: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LanguageModel for SseLlm {
    async fn generate_stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        let model = request
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.config.model.clone());

        let body = WireRequest {
            model: &model,
            messages: &request.messages,
            stream: true,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut http = self.client.post(&self.config.endpoint).json(&body);
        if !self.config.api_key.is_empty() {
            http = http.header("authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = http
            .send()
            .await
            .map_err(|e| Error::transient("llm", format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(crate::classify_status("llm", status, body));
        }

        let (tx, rx) = mpsc::channel::<Result<StreamChunk>>(64);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut line_buffer = String::new();

            'read: while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        // Mid-stream transport failure: the fragments
                        // forwarded so far stand; report and stop.
                        tracing::warn!(error = %e, "LLM stream dropped mid-response");
                        let _ = tx
                            .send(Err(Error::transient("llm", format!("stream error: {e}"))))
                            .await;
                        return;
                    }
                };

                line_buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = line_buffer.find('\n') {
                    let line = line_buffer[..pos].trim_end_matches('\r').to_string();
                    line_buffer.drain(..=pos);

                    match parse_sse_line(&line) {
                        Some(SseItem::Delta(delta)) => {
                            if tx.send(Ok(StreamChunk::text(delta))).await.is_err() {
                                // Receiver dropped: cooperative cancellation.
                                tracing::debug!("LLM stream cancelled by consumer");
                                return;
                            }
                        }
                        Some(SseItem::Done) => break 'read,
                        None => {}
                    }
                }
            }

            let _ = tx.send(Ok(StreamChunk::done())).await;
        });

        Ok(rx)
    }
}

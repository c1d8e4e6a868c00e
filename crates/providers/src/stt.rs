//! Chunked-HTTP streaming STT adapter
//!
//! One provider request stream per utterance. A worker task accumulates
//! PCM and posts the rolling buffer at a configurable interval, which
//! yields prompt interim hypotheses even against a batch transcription
//! endpoint; the final post after `Finish` produces the stable text.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

use voiceline_config::SttProviderConfig;
use voiceline_core::audio::pcm16_to_bytes;
use voiceline_core::{Error, Result, SpeechToText, SttAudio, SttEvent, SttUtterance, Transcript};

/// Response from the transcription endpoint.
#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    error: Option<String>,
}

fn default_confidence() -> f32 {
    0.9
}

/// STT adapter posting PCM buffers to an HTTP transcription service.
pub struct ChunkedHttpStt {
    client: reqwest::Client,
    config: SttProviderConfig,
}

impl ChunkedHttpStt {
    pub fn new(config: SttProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::transient("stt", format!("client build failed: {e}")))?;
        Ok(Self { client, config })
    }

    async fn transcribe(&self, samples: &[i16]) -> Result<Transcript> {
        let body = pcm16_to_bytes(samples);
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "audio/pcm")
            .body(body);
        if !self.config.api_key.is_empty() {
            request = request.header("authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transient("stt", format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(crate::classify_status("stt", status, body));
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| Error::transient("stt", format!("bad response: {e}")))?;

        if let Some(error) = parsed.error {
            tracing::warn!(%error, "transcription service reported an error");
        }

        Ok(Transcript::final_(parsed.text, parsed.confidence))
    }
}

#[async_trait]
impl SpeechToText for ChunkedHttpStt {
    async fn start_utterance(&self) -> Result<SttUtterance> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<SttAudio>(64);
        let (event_tx, event_rx) = mpsc::channel::<SttEvent>(16);

        let adapter = Self {
            client: self.client.clone(),
            config: self.config.clone(),
        };

        tokio::spawn(async move {
            let mut buffer: Vec<i16> = Vec::with_capacity(16_000);
            let mut posted_len = 0usize;
            let mut interval =
                tokio::time::interval(Duration::from_millis(adapter.config.interim_interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    cmd = audio_rx.recv() => match cmd {
                        Some(SttAudio::Pcm(samples)) => buffer.extend_from_slice(&samples),
                        // Channel closed counts as end of utterance too.
                        Some(SttAudio::Finish) | None => break,
                    },
                    _ = interval.tick() => {
                        if buffer.len() == posted_len || buffer.is_empty() {
                            continue;
                        }
                        posted_len = buffer.len();
                        // Interim hypotheses are best effort; a failed
                        // request only costs this interval's update.
                        match adapter.transcribe(&buffer).await {
                            Ok(t) if !t.is_empty() => {
                                let interim = Transcript::interim(t.text, t.confidence);
                                if event_tx.send(SttEvent::Interim(interim)).await.is_err() {
                                    return;
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "interim transcription failed");
                            }
                        }
                    }
                }
            }

            let event = if buffer.is_empty() {
                SttEvent::Final(Transcript::final_("", 0.0))
            } else {
                match adapter.transcribe(&buffer).await {
                    Ok(t) => SttEvent::Final(t),
                    Err(e) => SttEvent::Failed(e),
                }
            };
            let _ = event_tx.send(event).await;
        });

        Ok(SttUtterance {
            audio: audio_tx,
            events: event_rx,
        })
    }
}

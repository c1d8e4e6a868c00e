//! Per-turn generation: LLM stream -> chunker -> pipelined synthesis
//!
//! One task per turn. Text fragments are forwarded to the client as they
//! arrive and fed to the chunker; completed units are synthesized with
//! bounded concurrency but emitted strictly in unit order. The task
//! captures the generation at dispatch and re-checks it at every
//! suspension point; on supersession it stops without emitting anything
//! further (the egress multiplexer closes out the interrupted stream).

use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use voiceline_core::traits::VoiceSettings;
use voiceline_core::{
    ChatRequest, Error, LanguageModel, StreamChunk, SynthesizedAudio, TextToSpeech, TurnId,
};

use crate::chunker::{SynthChunker, SynthUnit};
use crate::egress::EgressHandle;
use crate::protocol::ServerMessage;
use crate::ArtifactStore;

/// Progress reports from a generation task to the controller.
#[derive(Debug)]
pub enum TurnEvent {
    /// The LLM stream finished; remaining synthesis units are flushing.
    LlmComplete { generation: u64 },
    /// The turn finished normally (including partial-failure turns).
    Completed {
        generation: u64,
        turn_id: TurnId,
        full_text: String,
        audio_chunk_ids: Vec<String>,
    },
    /// The turn failed before producing any fragment.
    Failed { generation: u64, error: Error },
}

/// Everything a generation task needs, captured at dispatch.
pub struct GenerationTask {
    pub session_id: String,
    pub generation: u64,
    pub turn_id: TurnId,
    pub request: ChatRequest,
    pub voice: VoiceSettings,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub egress: EgressHandle,
    pub generation_watch: watch::Receiver<u64>,
    pub events: mpsc::Sender<TurnEvent>,
    pub soft_cap_chars: usize,
    pub synth_concurrency: usize,
    pub llm_start_timeout: Duration,
    pub tts_unit_timeout: Duration,
}

impl GenerationTask {
    fn is_stale(&self) -> bool {
        *self.generation_watch.borrow() != self.generation
    }

    pub async fn run(mut self) {
        let generation = self.generation;

        let mut llm_rx = match tokio::time::timeout(
            self.llm_start_timeout,
            self.llm.generate_stream(self.request.clone()),
        )
        .await
        {
            Ok(Ok(rx)) => rx,
            Ok(Err(e)) => {
                let _ = self
                    .events
                    .send(TurnEvent::Failed {
                        generation,
                        error: e,
                    })
                    .await;
                return;
            }
            Err(_) => {
                let _ = self
                    .events
                    .send(TurnEvent::Failed {
                        generation,
                        error: Error::Timeout("llm_start"),
                    })
                    .await;
                return;
            }
        };

        // Synthesis pool: units in, (unit, result) out in unit order with
        // up to `synth_concurrency` requests in flight.
        let (unit_tx, unit_rx) = mpsc::channel::<SynthUnit>(32);
        let emitter = self.spawn_emitter(unit_rx);

        let mut chunker = SynthChunker::new(self.soft_cap_chars);
        let mut full_text = String::new();
        let mut first_fragment = true;
        // The first fragment is bounded by the LLM start timeout.
        let start_deadline = tokio::time::Instant::now() + self.llm_start_timeout;

        loop {
            let item = tokio::select! {
                item = llm_rx.recv() => item,
                _ = tokio::time::sleep_until(start_deadline), if first_fragment => {
                    drop(llm_rx);
                    drop(unit_tx);
                    let _ = emitter.await;
                    let _ = self
                        .events
                        .send(TurnEvent::Failed {
                            generation,
                            error: Error::Timeout("llm_start"),
                        })
                        .await;
                    return;
                }
                changed = self.generation_watch.changed() => {
                    if changed.is_err() || self.is_stale() {
                        // Superseded: release the provider stream and
                        // let the synth pool wind down.
                        drop(llm_rx);
                        drop(unit_tx);
                        let _ = emitter.await;
                        return;
                    }
                    continue;
                }
            };

            match item {
                Some(Ok(chunk)) if chunk.is_final => break,
                Some(Ok(StreamChunk { delta, .. })) => {
                    if delta.is_empty() {
                        continue;
                    }
                    if first_fragment {
                        first_fragment = false;
                    }
                    full_text.push_str(&delta);
                    self.egress
                        .emit(generation, ServerMessage::TextChunk { text: delta.clone() })
                        .await;
                    for unit in chunker.push(&delta) {
                        if unit_tx.send(unit).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    if first_fragment {
                        // Nothing produced: the turn fails as a whole.
                        drop(llm_rx);
                        drop(unit_tx);
                        let _ = emitter.await;
                        let _ = self
                            .events
                            .send(TurnEvent::Failed {
                                generation,
                                error: e,
                            })
                            .await;
                        return;
                    }
                    // Partial failure mid-stream: keep the fragments
                    // received so far and complete the turn normally.
                    tracing::warn!(error = %e, "LLM stream failed mid-response, keeping partial");
                    break;
                }
                None => break,
            }
        }
        drop(llm_rx);

        if let Some(tail) = chunker.finish() {
            let _ = unit_tx.send(tail).await;
        }
        drop(unit_tx);

        let _ = self.events.send(TurnEvent::LlmComplete { generation }).await;

        let audio_chunk_ids = emitter.await.unwrap_or_default();

        if self.is_stale() {
            return;
        }

        self.egress
            .emit(
                generation,
                ServerMessage::StreamComplete {
                    full_text: full_text.clone(),
                    interrupted: false,
                },
            )
            .await;

        let _ = self
            .events
            .send(TurnEvent::Completed {
                generation,
                turn_id: self.turn_id,
                full_text,
                audio_chunk_ids,
            })
            .await;
    }

    /// Consume ordered synthesis results and emit audio chunks.
    ///
    /// Returns the artifact ids emitted, in unit order.
    fn spawn_emitter(
        &self,
        unit_rx: mpsc::Receiver<SynthUnit>,
    ) -> tokio::task::JoinHandle<Vec<String>> {
        let generation = self.generation;
        let session_id = self.session_id.clone();
        let tts = self.tts.clone();
        let voice = self.voice.clone();
        let artifacts = self.artifacts.clone();
        let egress = self.egress.clone();
        let generation_watch = self.generation_watch.clone();
        let unit_timeout = self.tts_unit_timeout;
        let concurrency = self.synth_concurrency.max(1);

        tokio::spawn(async move {
            let synth_results = stream::unfold(unit_rx, |mut rx| async move {
                rx.recv().await.map(|unit| (unit, rx))
            })
            .map(|unit| {
                let tts = tts.clone();
                let voice = voice.clone();
                async move {
                    let result = tokio::time::timeout(
                        unit_timeout,
                        tts.synthesize(&unit.text, &voice),
                    )
                    .await;
                    (unit, result)
                }
            })
            .buffered(concurrency);
            futures::pin_mut!(synth_results);

            let mut audio_chunk_ids = Vec::new();
            while let Some((unit, result)) = synth_results.next().await {
                if *generation_watch.borrow() != generation {
                    // Superseded; in-flight requests are dropped with the
                    // stream when this task returns.
                    break;
                }
                match result {
                    Ok(Ok(SynthesizedAudio { bytes, content_type })) => {
                        let id = artifacts.put(&session_id, bytes, content_type);
                        egress
                            .emit(
                                generation,
                                ServerMessage::AudioChunk {
                                    audio_url: format!("/audio/{id}"),
                                    text: unit.text,
                                    unit_index: unit.index,
                                },
                            )
                            .await;
                        audio_chunk_ids.push(id);
                    }
                    Ok(Err(e)) => {
                        // The unit's text chunk already went out; skip the
                        // audio and continue with later units.
                        tracing::warn!(
                            unit = unit.index,
                            error = %e,
                            "synthesis failed for unit"
                        );
                        egress
                            .emit(
                                generation,
                                ServerMessage::Error {
                                    kind: e.kind_str().to_string(),
                                    message: format!(
                                        "audio unavailable for unit {}",
                                        unit.index
                                    ),
                                },
                            )
                            .await;
                    }
                    Err(_) => {
                        tracing::warn!(unit = unit.index, "synthesis timed out for unit");
                        egress
                            .emit(
                                generation,
                                ServerMessage::Error {
                                    kind: "timeout".to_string(),
                                    message: format!(
                                        "audio unavailable for unit {}",
                                        unit.index
                                    ),
                                },
                            )
                            .await;
                    }
                }
            }
            audio_chunk_ids
        })
    }
}

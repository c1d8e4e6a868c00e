//! Provider contracts
//!
//! The dialog core is written against these three traits; concrete
//! adapters live in the providers crate and tests use scripted fakes.
//! Components talk over bounded channels; dropping the receiving side of
//! a stream is the cooperative cancellation signal.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::llm::{ChatRequest, StreamChunk};
use crate::transcript::Transcript;

/// Event surfaced by an STT utterance stream.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// Partial hypothesis, emitted promptly and possibly revised.
    Interim(Transcript),
    /// Stable text for the ended utterance. Last event on success.
    Final(Transcript),
    /// The provider connection failed mid-utterance. Last event.
    Failed(Error),
}

/// Handle to one in-flight STT utterance.
///
/// Audio is written through `audio`; closing it (dropping the sender or
/// sending `finish`) asks the provider to finalize. Events arrive on
/// `events` until `Final` or `Failed`.
pub struct SttUtterance {
    pub audio: mpsc::Sender<SttAudio>,
    pub events: mpsc::Receiver<SttEvent>,
}

/// Audio command for an STT utterance.
#[derive(Debug)]
pub enum SttAudio {
    /// 16-bit mono PCM samples.
    Pcm(Vec<i16>),
    /// End of utterance; the provider should produce the final transcript.
    Finish,
}

/// Streaming speech-to-text provider.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Open a stream for a single utterance.
    async fn start_utterance(&self) -> Result<SttUtterance>;
}

/// Streaming language model provider.
///
/// The returned receiver yields text deltas; an `Err` item ends the
/// stream (the fragments received before it are kept). Dropping the
/// receiver cancels the generation and releases the connection.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate_stream(&self, request: ChatRequest)
        -> Result<mpsc::Receiver<Result<StreamChunk>>>;
}

/// A synthesized audio artifact.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Voice parameters for a synthesis request.
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub voice_id: String,
    pub speed: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice_id: String::new(),
            speed: 1.0,
        }
    }
}

/// Text-to-speech provider. One request per synthesis unit.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<SynthesizedAudio>;
}

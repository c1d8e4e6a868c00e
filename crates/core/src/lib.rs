//! Core types and provider contracts for the voiceline dialog server
//!
//! This crate provides the foundation shared by all other crates:
//! - Inbound audio configuration and PCM helpers
//! - Transcript and dialog history types
//! - LLM chat request/response types
//! - The read-only agent profile record
//! - Provider traits (STT, LLM, TTS)
//! - Error taxonomy

pub mod agent;
pub mod audio;
pub mod error;
pub mod history;
pub mod llm;
pub mod traits;
pub mod transcript;

pub use agent::AgentProfile;
pub use audio::{AudioConfig, FRAME_MS, FRAME_SAMPLES, SAMPLE_RATE_HZ};
pub use error::{Error, ErrorKind, Result};
pub use history::{DialogHistory, HistoryEntry, Role, Turn, TurnId};
pub use llm::{ChatMessage, ChatRequest, ChatRole, StreamChunk};
pub use traits::{
    LanguageModel, SpeechToText, SttAudio, SttEvent, SttUtterance, SynthesizedAudio, TextToSpeech,
    VoiceSettings,
};
pub use transcript::Transcript;

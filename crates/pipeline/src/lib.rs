//! Per-session dialog orchestration
//!
//! This crate composes the streaming providers into a turn-taking
//! conversation over a duplex transport:
//! - frame decoding and the wire protocol (`protocol`)
//! - voice-activity detection with pre-speech capture (`vad`)
//! - the turn controller state machine (`controller`)
//! - streaming generation: LLM -> chunker -> pipelined TTS (`generate`,
//!   `chunker`)
//! - the single-writer egress multiplexer (`egress`)
//!
//! All cross-task communication is over bounded channels; the turn
//! controller is the sole mutator of session state, and every async
//! worker captures the generation counter at dispatch and re-checks it
//! before publishing.

pub mod chunker;
pub mod controller;
pub mod egress;
pub mod generate;
pub mod protocol;
pub mod vad;

pub use chunker::{SynthChunker, SynthUnit};
pub use controller::{spawn_session, Inbound, Providers, SessionHandle, SessionParams};
pub use egress::{spawn_egress, EgressHandle};
pub use protocol::{ClientFrame, FrameDecoder, ServerMessage};
pub use vad::{VoiceGate, VadOutput};

use voiceline_core::AgentProfile;

/// Storage for synthesized audio artifacts (implemented by the server's
/// cache; tests use an in-memory fake).
pub trait ArtifactStore: Send + Sync {
    /// Store an artifact and return its opaque id.
    fn put(&self, session_id: &str, bytes: Vec<u8>, content_type: String) -> String;
}

/// Read-only agent configuration lookup.
pub trait AgentLookup: Send + Sync {
    fn get(&self, agent_id: &str) -> Option<AgentProfile>;
}

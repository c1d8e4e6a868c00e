//! Wire protocol and frame decoding
//!
//! The duplex transport interleaves textual control frames (JSON records
//! discriminated by `type`) with opaque binary frames (raw PCM). The
//! decoder validates the `audio_config` handshake before any PCM is
//! accepted, dispatches known discriminators, ignores unknown ones with
//! a warning, and treats malformed control frames as fatal.

use serde::{Deserialize, Serialize};

use voiceline_core::{AudioConfig, Error};

/// Control frames sent by the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Audio handshake; required before binary frames are accepted.
    AudioConfig {
        sample_rate: u32,
        encoding: String,
        channels: u16,
    },
    /// Select the agent record for this session.
    AgentConfig { agent_id: String },
    /// Informational.
    CallStarted,
    /// Text-only user turn, bypassing STT.
    Message {
        content: String,
        #[serde(default)]
        conversation: Vec<WireHistoryEntry>,
    },
    /// Explicit client-requested barge-in.
    Interrupt {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Client finished playing the last audio chunk.
    AudioPlaybackComplete,
}

/// History entry as supplied on a `message` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct WireHistoryEntry {
    pub role: String,
    pub content: String,
}

const KNOWN_TYPES: &[&str] = &[
    "audio_config",
    "agent_config",
    "call_started",
    "message",
    "interrupt",
    "audio_playback_complete",
];

/// Messages serialized to the client by the egress multiplexer.
///
/// A monotonic `timestamp` (seconds since session start, float) is
/// stamped onto every message at serialization time.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SpeechStart,
    SpeechEnd,
    InterimTranscript { text: String },
    UserTranscript { text: String },
    StreamStart,
    TextChunk { text: String },
    AudioChunk {
        audio_url: String,
        text: String,
        unit_index: usize,
    },
    StreamComplete { full_text: String, interrupted: bool },
    AgentGreeting { text: String },
    GreetingAudio { audio_url: String, text: String },
    StopAudioImmediately,
    Error { kind: String, message: String },
}

/// Stateful decoder for one session's inbound frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    handshaken: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the audio handshake has completed.
    pub fn handshaken(&self) -> bool {
        self.handshaken
    }

    /// Decode a textual control frame.
    ///
    /// Returns `Ok(None)` for unknown discriminators (logged and
    /// ignored); malformed frames and a rejected handshake are protocol
    /// errors, fatal for the session.
    pub fn decode_control(&mut self, text: &str) -> Result<Option<ClientFrame>, Error> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("unparsable control frame: {e}")))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::Protocol("control frame without a type field".to_string()))?
            .to_string();

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            tracing::warn!(r#type = kind, "ignoring unknown control frame");
            return Ok(None);
        }

        let frame: ClientFrame = serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("malformed {kind} frame: {e}")))?;

        if let ClientFrame::AudioConfig {
            sample_rate,
            encoding,
            channels,
        } = &frame
        {
            let config = AudioConfig {
                sample_rate: *sample_rate,
                encoding: encoding.clone(),
                channels: *channels,
            };
            config.validate()?;
            self.handshaken = true;
        }

        Ok(Some(frame))
    }
}

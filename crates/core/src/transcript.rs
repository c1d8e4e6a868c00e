//! Transcript types produced by the STT adapter

use serde::{Deserialize, Serialize};

/// A transcription hypothesis.
///
/// Interim transcripts are unstable and may be revised; a final
/// transcript is the stable text for an ended utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
}

impl Transcript {
    pub fn interim(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence,
        }
    }

    pub fn final_(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

//! HTTP TTS adapter
//!
//! One POST per synthesis unit; the response body is the audio artifact.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use voiceline_config::TtsProviderConfig;
use voiceline_core::traits::VoiceSettings;
use voiceline_core::{Error, Result, SynthesizedAudio, TextToSpeech};

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    speed: f32,
}

/// TTS backend posting units to an HTTP synthesis service.
pub struct HttpTts {
    client: reqwest::Client,
    config: TtsProviderConfig,
}

impl HttpTts {
    pub fn new(config: TtsProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::transient("tts", format!("client build failed: {e}")))?;
        Ok(Self { client, config })
    }

    fn voice_id<'a>(&'a self, voice: &'a VoiceSettings) -> &'a str {
        if voice.voice_id.is_empty() {
            &self.config.default_voice
        } else {
            &voice.voice_id
        }
    }
}

#[async_trait]
impl TextToSpeech for HttpTts {
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<SynthesizedAudio> {
        let body = SynthesizeRequest {
            text,
            voice_id: self.voice_id(voice),
            speed: voice.speed,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.header("xi-api-key", &self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transient("tts", format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(crate::classify_status("tts", status, body));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::transient("tts", format!("body read failed: {e}")))?;

        if bytes.is_empty() {
            return Err(Error::transient("tts", "empty audio response"));
        }

        Ok(SynthesizedAudio {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

//! Application settings
//!
//! Layering: `config/default.yaml` < `config/{env}.yaml` < `VOICELINE_*`
//! environment variables. Every section has serde defaults so a missing
//! file still produces a runnable configuration.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub vad: VadSettings,
    #[serde(default)]
    pub chunker: ChunkerSettings,
    #[serde(default)]
    pub synthesis: SynthesisSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub providers: ProviderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_enabled: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cors_enabled: false,
            cors_origins: Vec::new(),
            log_json: false,
            log_level: default_log_level(),
        }
    }
}

/// Voice-activity detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    /// Classifier aggressiveness, 0 (permissive) to 3 (strict).
    #[serde(default = "default_aggressiveness")]
    pub aggressiveness: u8,
    /// Consecutive speech frames before speech_start fires.
    #[serde(default = "default_start_frames")]
    pub start_frames: usize,
    /// Consecutive non-speech frames before speech_end fires.
    #[serde(default = "default_end_frames")]
    pub end_frames: usize,
    /// Pre-speech ring buffer length in milliseconds.
    #[serde(default = "default_pre_speech_ms")]
    pub pre_speech_ms: u32,
}

fn default_aggressiveness() -> u8 {
    2
}

fn default_start_frames() -> usize {
    3
}

fn default_end_frames() -> usize {
    27
}

fn default_pre_speech_ms() -> u32 {
    150
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            aggressiveness: default_aggressiveness(),
            start_frames: default_start_frames(),
            end_frames: default_end_frames(),
            pre_speech_ms: default_pre_speech_ms(),
        }
    }
}

/// Response chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerSettings {
    /// Buffered characters that force a unit without terminal punctuation.
    #[serde(default = "default_soft_cap")]
    pub soft_cap_chars: usize,
}

fn default_soft_cap() -> usize {
    240
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self {
            soft_cap_chars: default_soft_cap(),
        }
    }
}

/// TTS pipelining parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisSettings {
    /// Units synthesized concurrently per turn.
    #[serde(default = "default_synth_concurrency")]
    pub concurrency: usize,
}

fn default_synth_concurrency() -> usize {
    3
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            concurrency: default_synth_concurrency(),
        }
    }
}

/// Timeout table (seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Session closed after this long with no audio or control frames.
    #[serde(default = "default_idle_session_secs")]
    pub idle_session_secs: u64,
    /// First LLM fragment must arrive within this bound.
    #[serde(default = "default_llm_start_secs")]
    pub llm_start_secs: u64,
    /// Per-unit TTS synthesis bound.
    #[serde(default = "default_tts_unit_secs")]
    pub tts_unit_secs: u64,
    /// STT silence bound while listening.
    #[serde(default = "default_stt_inactivity_secs")]
    pub stt_inactivity_secs: u64,
}

fn default_idle_session_secs() -> u64 {
    600
}

fn default_llm_start_secs() -> u64 {
    30
}

fn default_tts_unit_secs() -> u64 {
    20
}

fn default_stt_inactivity_secs() -> u64 {
    60
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            idle_session_secs: default_idle_session_secs(),
            llm_start_secs: default_llm_start_secs(),
            tts_unit_secs: default_tts_unit_secs(),
            stt_inactivity_secs: default_stt_inactivity_secs(),
        }
    }
}

/// Audio artifact cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Soft total-size bound; LRU eviction above it.
    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_reap_interval_secs() -> u64 {
    60
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_bytes: default_cache_max_bytes(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

/// Generation parameters independent of the provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_history_window() -> usize {
    16
}

fn default_max_tokens() -> u32 {
    256
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Provider endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderSettings {
    #[serde(default)]
    pub stt: SttProviderConfig,
    #[serde(default)]
    pub llm: LlmProviderConfig,
    #[serde(default)]
    pub tts: TtsProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttProviderConfig {
    #[serde(default = "default_stt_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    /// Interval between interim transcription requests (milliseconds).
    #[serde(default = "default_interim_interval_ms")]
    pub interim_interval_ms: u64,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_stt_endpoint() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_interim_interval_ms() -> u64 {
    500
}

fn default_provider_timeout_secs() -> u64 {
    30
}

impl Default for SttProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_stt_endpoint(),
            api_key: String::new(),
            interim_interval_ms: default_interim_interval_ms(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:11434/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: String::new(),
            model: default_llm_model(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsProviderConfig {
    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_tts_voice")]
    pub default_voice: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tts_endpoint() -> String {
    "http://127.0.0.1:8091/synthesize".to_string()
}

fn default_tts_voice() -> String {
    "21m00Tcm4TlvDq8ikWAM".to_string()
}

impl Default for TtsProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_tts_endpoint(),
            api_key: String::new(),
            default_voice: default_tts_voice(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

/// Load settings with file and environment layering.
///
/// Priority: env vars > `config/{env}.yaml` > `config/default.yaml` > defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(env) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env}")).required(false));
    }

    let settings: Settings = builder
        .add_source(Environment::with_prefix("VOICELINE").separator("__"))
        .build()?
        .try_deserialize()?;

    settings.validate()?;
    Ok(settings)
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vad.aggressiveness > 3 {
            return Err(ConfigError::InvalidValue {
                field: "vad.aggressiveness",
                message: format!("must be 0..=3, got {}", self.vad.aggressiveness),
            });
        }
        if self.vad.start_frames == 0 || self.vad.end_frames == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.start_frames",
                message: "edge detector frame counts must be positive".to_string(),
            });
        }
        if self.chunker.soft_cap_chars < 16 {
            return Err(ConfigError::InvalidValue {
                field: "chunker.soft_cap_chars",
                message: format!("too small to bound latency sensibly: {}", self.chunker.soft_cap_chars),
            });
        }
        if self.synthesis.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "synthesis.concurrency",
                message: "must be at least 1".to_string(),
            });
        }
        if self.timeouts.idle_session_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeouts.idle_session_secs",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

//! Turn controller
//!
//! One controller task per session. It is the sole mutator of session
//! state (generation counter, dialog history, current turn, phase) and
//! arbitrates between listening, generating, speaking and barged states.
//! Everything else - the STT utterance worker, generation tasks, the
//! egress actor - communicates with it over bounded channels and checks
//! the generation watch before publishing.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

use voiceline_config::Settings;
use voiceline_core::audio::pcm16_from_bytes;
use voiceline_core::traits::VoiceSettings;
use voiceline_core::{
    AgentProfile, ChatMessage, ChatRequest, DialogHistory, Error, LanguageModel, Role,
    SpeechToText, SttAudio, SttEvent, SttUtterance, TextToSpeech, Turn,
};

use crate::egress::{spawn_egress, EgressHandle};
use crate::generate::{GenerationTask, TurnEvent};
use crate::protocol::{ClientFrame, FrameDecoder, ServerMessage, WireHistoryEntry};
use crate::vad::{VadOutput, VoiceGate};
use crate::{AgentLookup, ArtifactStore};

/// Frames delivered by the transport reader.
#[derive(Debug)]
pub enum Inbound {
    /// Textual control frame (JSON).
    Control(String),
    /// Binary frame: raw 16-bit little-endian PCM.
    Audio(Vec<u8>),
    /// Transport closed.
    Closed,
}

/// Provider adapters for one session.
#[derive(Clone)]
pub struct Providers {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
}

/// Static parameters of one session.
pub struct SessionParams {
    pub session_id: String,
    pub settings: Settings,
    /// Transport metadata injected into the prompt when the agent
    /// profile enables caller info.
    pub caller_info: Option<String>,
}

/// Handle returned to the transport layer.
pub struct SessionHandle {
    /// Feed decoded transport frames here.
    pub inbound: mpsc::Sender<Inbound>,
    /// The controller task; completes when the session ends.
    pub task: tokio::task::JoinHandle<()>,
}

/// Spawn the egress actor and controller for one session.
///
/// Serialized outbound messages arrive on `out` in emission order; the
/// caller owns the single transport writer that drains it.
pub fn spawn_session(
    params: SessionParams,
    providers: Providers,
    agents: Arc<dyn AgentLookup>,
    artifacts: Arc<dyn ArtifactStore>,
    out: mpsc::Sender<String>,
) -> SessionHandle {
    let (inbound_tx, inbound_rx) = mpsc::channel(256);
    let egress = spawn_egress(out, Instant::now());
    let controller = Controller::new(params, providers, agents, artifacts, egress, inbound_rx);
    let task = tokio::spawn(controller.run());
    SessionHandle {
        inbound: inbound_tx,
        task,
    }
}

/// Session phase. Barged is transient: a barge-in supersedes the
/// active generation and lands in Listening (speech) or Idle (explicit
/// interrupt) within the same event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Listening,
    Generating,
    SpeakingTail,
}

struct ActiveUtterance {
    audio: mpsc::Sender<SttAudio>,
    finished: bool,
}

struct Controller {
    session_id: String,
    settings: Settings,
    caller_info: Option<String>,

    providers: Providers,
    agents: Arc<dyn AgentLookup>,
    artifacts: Arc<dyn ArtifactStore>,
    egress: EgressHandle,

    inbound_rx: mpsc::Receiver<Inbound>,
    stt_tx: mpsc::Sender<(u64, SttEvent)>,
    stt_rx: mpsc::Receiver<(u64, SttEvent)>,
    turn_tx: mpsc::Sender<TurnEvent>,
    turn_rx: mpsc::Receiver<TurnEvent>,

    phase: Phase,
    generation: u64,
    generation_tx: watch::Sender<u64>,
    history: DialogHistory,
    turn: Option<Turn>,
    profile: AgentProfile,
    decoder: FrameDecoder,
    vad: VoiceGate,
    utterance: Option<ActiveUtterance>,

    last_activity: Instant,
    last_stt_activity: Instant,
}

impl Controller {
    fn new(
        params: SessionParams,
        providers: Providers,
        agents: Arc<dyn AgentLookup>,
        artifacts: Arc<dyn ArtifactStore>,
        egress: EgressHandle,
        inbound_rx: mpsc::Receiver<Inbound>,
    ) -> Self {
        let (stt_tx, stt_rx) = mpsc::channel(64);
        let (turn_tx, turn_rx) = mpsc::channel(16);
        let (generation_tx, _) = watch::channel(0u64);
        let vad = VoiceGate::new(&params.settings.vad);

        Self {
            session_id: params.session_id,
            settings: params.settings,
            caller_info: params.caller_info,
            providers,
            agents,
            artifacts,
            egress,
            inbound_rx,
            stt_tx,
            stt_rx,
            turn_tx,
            turn_rx,
            phase: Phase::Idle,
            generation: 0,
            generation_tx,
            history: DialogHistory::new(),
            turn: None,
            profile: AgentProfile::default(),
            decoder: FrameDecoder::new(),
            vad,
            utterance: None,
            last_activity: Instant::now(),
            last_stt_activity: Instant::now(),
        }
    }

    async fn run(mut self) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                inbound = self.inbound_rx.recv() => {
                    self.last_activity = Instant::now();
                    match inbound {
                        Some(Inbound::Control(text)) => {
                            if let Err(e) = self.on_control(&text).await {
                                self.emit_error(&e).await;
                                if e.is_fatal() {
                                    tracing::error!(error = %e, "fatal protocol error, closing session");
                                    break;
                                }
                            }
                        }
                        Some(Inbound::Audio(bytes)) => self.on_audio(&bytes).await,
                        Some(Inbound::Closed) | None => break,
                    }
                }
                Some((generation, event)) = self.stt_rx.recv() => {
                    self.on_stt_event(generation, event).await;
                }
                Some(event) = self.turn_rx.recv() => {
                    if self.on_turn_event(event).await.is_err() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    if self.check_timeouts().await {
                        break;
                    }
                }
            }
        }

        tracing::info!(session_id = %self.session_id, "session controller stopped");
    }

    async fn on_control(&mut self, text: &str) -> Result<(), Error> {
        let Some(frame) = self.decoder.decode_control(text)? else {
            return Ok(());
        };

        match frame {
            ClientFrame::AudioConfig { sample_rate, .. } => {
                tracing::info!(sample_rate, "audio handshake accepted");
            }
            ClientFrame::AgentConfig { agent_id } => self.on_agent_config(&agent_id).await,
            ClientFrame::CallStarted => {
                tracing::info!(session_id = %self.session_id, "call started");
            }
            ClientFrame::Message {
                content,
                conversation,
            } => self.on_text_message(content, conversation).await,
            ClientFrame::Interrupt { reason } => self.on_interrupt(reason.as_deref()).await,
            ClientFrame::AudioPlaybackComplete => {
                tracing::debug!("client finished audio playback");
            }
        }
        Ok(())
    }

    async fn on_agent_config(&mut self, agent_id: &str) {
        let Some(profile) = self.agents.get(agent_id) else {
            tracing::warn!(agent_id, "unknown agent requested");
            self.egress
                .emit(
                    self.generation,
                    ServerMessage::Error {
                        kind: "unknown_agent".to_string(),
                        message: format!("no agent with id {agent_id}"),
                    },
                )
                .await;
            return;
        };

        tracing::info!(agent = %profile.name, "agent configured");
        self.profile = profile;

        if !self.profile.greeting.is_empty() {
            self.egress
                .emit(
                    self.generation,
                    ServerMessage::AgentGreeting {
                        text: self.profile.greeting.clone(),
                    },
                )
                .await;
            self.spawn_greeting();
        }
    }

    /// Synthesize the greeting off the control path; the emitted message
    /// is dropped if the user has already superseded this generation.
    fn spawn_greeting(&self) {
        let generation = self.generation;
        let text = self.profile.greeting.clone();
        let voice = self.voice_settings();
        let tts = self.providers.tts.clone();
        let artifacts = self.artifacts.clone();
        let egress = self.egress.clone();
        let session_id = self.session_id.clone();
        let unit_timeout = Duration::from_secs(self.settings.timeouts.tts_unit_secs);

        tokio::spawn(async move {
            match tokio::time::timeout(unit_timeout, tts.synthesize(&text, &voice)).await {
                Ok(Ok(audio)) => {
                    let id = artifacts.put(&session_id, audio.bytes, audio.content_type);
                    egress
                        .emit(
                            generation,
                            ServerMessage::GreetingAudio {
                                audio_url: format!("/audio/{id}"),
                                text,
                            },
                        )
                        .await;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "greeting synthesis failed");
                    egress
                        .emit(
                            generation,
                            ServerMessage::Error {
                                kind: e.kind_str().to_string(),
                                message: "greeting audio unavailable".to_string(),
                            },
                        )
                        .await;
                }
                Err(_) => {
                    tracing::warn!("greeting synthesis timed out");
                    egress
                        .emit(
                            generation,
                            ServerMessage::Error {
                                kind: "timeout".to_string(),
                                message: "greeting audio unavailable".to_string(),
                            },
                        )
                        .await;
                }
            }
        });
    }

    async fn on_audio(&mut self, bytes: &[u8]) {
        if !self.decoder.handshaken() {
            tracing::warn!("discarding PCM received before audio_config handshake");
            return;
        }

        let samples = pcm16_from_bytes(bytes);
        for output in self.vad.push(&samples) {
            match output {
                VadOutput::SpeechStart => self.on_speech_start("vad").await,
                VadOutput::Frame(frame) => {
                    if self.phase == Phase::Listening {
                        if let Some(utterance) = &self.utterance {
                            if !utterance.finished
                                && utterance.audio.send(SttAudio::Pcm(frame)).await.is_err()
                            {
                                tracing::warn!("transcription stream dropped audio");
                            }
                        }
                    }
                }
                VadOutput::SpeechEnd => {
                    if self.phase == Phase::Listening {
                        self.egress
                            .emit(self.generation, ServerMessage::SpeechEnd)
                            .await;
                        if let Some(utterance) = &mut self.utterance {
                            if !utterance.finished {
                                utterance.finished = true;
                                let _ = utterance.audio.send(SttAudio::Finish).await;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Speech onset: barge-in when the agent is generating or speaking,
    /// then open a new listening turn.
    async fn on_speech_start(&mut self, source: &str) {
        match self.phase {
            Phase::Generating | Phase::SpeakingTail => {
                self.barge_in(source).await;
                self.begin_listening().await;
            }
            Phase::Idle => self.begin_listening().await,
            Phase::Listening => {}
        }
    }

    /// Open the next user turn: advance the generation and start a
    /// transcription utterance.
    async fn begin_listening(&mut self) {
        self.bump_generation();
        self.phase = Phase::Listening;
        self.last_stt_activity = Instant::now();
        self.egress
            .emit(self.generation, ServerMessage::SpeechStart)
            .await;

        match self.providers.stt.start_utterance().await {
            Ok(SttUtterance { audio, mut events }) => {
                let generation = self.generation;
                let stt_tx = self.stt_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        let last = matches!(event, SttEvent::Final(_) | SttEvent::Failed(_));
                        if stt_tx.send((generation, event)).await.is_err() || last {
                            break;
                        }
                    }
                });
                self.utterance = Some(ActiveUtterance {
                    audio,
                    finished: false,
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to open transcription stream");
                self.emit_error(&e).await;
                self.phase = Phase::Idle;
            }
        }
    }

    async fn on_stt_event(&mut self, generation: u64, event: SttEvent) {
        if generation != self.generation {
            tracing::trace!(generation, current = self.generation, "stale STT event");
            return;
        }

        match event {
            SttEvent::Interim(transcript) => {
                if self.phase == Phase::Listening {
                    self.last_stt_activity = Instant::now();
                    if !transcript.is_empty() {
                        self.egress
                            .emit(
                                self.generation,
                                ServerMessage::InterimTranscript {
                                    text: transcript.text,
                                },
                            )
                            .await;
                    }
                }
            }
            SttEvent::Final(transcript) => {
                self.utterance = None;
                match self.phase {
                    Phase::Listening => {
                        if transcript.is_empty() {
                            // Speech ended without usable text; nothing
                            // enters history.
                            self.phase = Phase::Idle;
                        } else {
                            self.start_turn(transcript.text).await;
                        }
                    }
                    Phase::Generating | Phase::SpeakingTail => {
                        // Extremely late final for the current generation:
                        // supersede and start fresh with it.
                        self.barge_in("late_final").await;
                        if transcript.is_empty() {
                            self.phase = Phase::Idle;
                        } else {
                            self.bump_generation();
                            self.start_turn(transcript.text).await;
                        }
                    }
                    Phase::Idle => {
                        tracing::debug!("final transcript discarded in idle phase");
                    }
                }
            }
            SttEvent::Failed(error) => {
                if self.phase == Phase::Listening {
                    tracing::warn!(error = %error, "transcription failed mid-utterance");
                    self.emit_error(&error).await;
                    self.utterance = None;
                    self.phase = Phase::Idle;
                }
            }
        }
    }

    /// Text-only user turn over the `message` control frame.
    async fn on_text_message(&mut self, content: String, conversation: Vec<WireHistoryEntry>) {
        if self.history.is_empty() && !conversation.is_empty() {
            self.history
                .seed(conversation.into_iter().filter_map(|entry| {
                    match entry.role.as_str() {
                        "user" => Some((Role::User, entry.content)),
                        "assistant" => Some((Role::Assistant, entry.content)),
                        other => {
                            tracing::warn!(role = other, "skipping seed entry with unknown role");
                            None
                        }
                    }
                }));
        }

        if matches!(self.phase, Phase::Generating | Phase::SpeakingTail) {
            self.barge_in("client_message").await;
        }

        self.utterance = None;
        self.bump_generation();
        self.start_turn(content).await;
    }

    async fn on_interrupt(&mut self, reason: Option<&str>) {
        match self.phase {
            Phase::Generating | Phase::SpeakingTail => {
                tracing::info!(reason = reason.unwrap_or("unspecified"), "client interrupt");
                self.barge_in("client_interrupt").await;
                self.phase = Phase::Idle;
            }
            _ => {
                // Idempotent from idle or an already-superseded state.
                tracing::debug!(phase = ?self.phase, "interrupt ignored");
            }
        }
    }

    /// Supersede the active generation: cancel in-flight work, close out
    /// the interrupted stream, and truncate history to what was
    /// delivered.
    async fn barge_in(&mut self, source: &str) {
        tracing::info!(
            source,
            superseded = self.generation,
            "barge-in: cancelling active generation"
        );
        self.bump_generation();
        let delivered = self.egress.supersede(self.generation).await;
        if let Some(mut turn) = self.turn.take() {
            turn.interrupted = true;
            self.history.abort_turn(&turn, &delivered);
        }
    }

    fn bump_generation(&mut self) {
        self.generation += 1;
        let _ = self.generation_tx.send(self.generation);
    }

    /// Open a turn from a final transcript or text message and dispatch
    /// the generation task.
    async fn start_turn(&mut self, user_text: String) {
        let turn = self.history.begin_turn(self.generation, user_text.clone());
        self.egress
            .emit(
                self.generation,
                ServerMessage::UserTranscript { text: user_text },
            )
            .await;
        self.egress
            .emit(self.generation, ServerMessage::StreamStart)
            .await;
        self.phase = Phase::Generating;

        let task = GenerationTask {
            session_id: self.session_id.clone(),
            generation: self.generation,
            turn_id: turn.id,
            request: self.build_request(),
            voice: self.voice_settings(),
            llm: self.providers.llm.clone(),
            tts: self.providers.tts.clone(),
            artifacts: self.artifacts.clone(),
            egress: self.egress.clone(),
            generation_watch: self.generation_tx.subscribe(),
            events: self.turn_tx.clone(),
            soft_cap_chars: self.settings.chunker.soft_cap_chars,
            synth_concurrency: self.settings.synthesis.concurrency,
            llm_start_timeout: Duration::from_secs(self.settings.timeouts.llm_start_secs),
            tts_unit_timeout: Duration::from_secs(self.settings.timeouts.tts_unit_secs),
        };
        self.turn = Some(turn);
        tokio::spawn(task.run());
    }

    fn build_request(&self) -> ChatRequest {
        let system = self.profile.build_system_prompt(self.caller_info.as_deref());
        let mut request = ChatRequest::new(system)
            .with_max_tokens(self.settings.llm.max_tokens)
            .with_temperature(self.settings.llm.temperature);

        if !self.profile.llm_model.is_empty() {
            request = request.with_model(self.profile.llm_model.clone());
        }

        for entry in self.history.window(self.settings.llm.history_window) {
            let message = match entry.role {
                Role::User => ChatMessage::user(entry.content.clone()),
                Role::Assistant => ChatMessage::assistant(entry.content.clone()),
            };
            request = request.with_message(message);
        }
        request
    }

    fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            voice_id: self.profile.voice.clone(),
            speed: self.profile.speed,
        }
    }

    async fn on_turn_event(&mut self, event: TurnEvent) -> Result<(), ()> {
        match event {
            TurnEvent::LlmComplete { generation } => {
                if generation == self.generation && self.phase == Phase::Generating {
                    self.phase = Phase::SpeakingTail;
                }
            }
            TurnEvent::Completed {
                generation,
                turn_id,
                full_text,
                audio_chunk_ids,
            } => {
                if generation != self.generation {
                    tracing::trace!(generation, turn_id, "stale turn completion discarded");
                    return Ok(());
                }
                if let Some(mut turn) = self.turn.take() {
                    turn.assistant_text = full_text.clone();
                    turn.audio_chunk_ids = audio_chunk_ids;
                    self.history.commit_assistant(&turn, &full_text);
                }
                self.phase = Phase::Idle;
                debug_assert!(self.history.is_alternating());
            }
            TurnEvent::Failed { generation, error } => {
                if generation != self.generation {
                    return Ok(());
                }
                self.emit_error(&error).await;
                // History stays unchanged for the failed turn.
                if let Some(turn) = self.turn.take() {
                    self.history.abort_turn(&turn, "");
                }
                if error.is_fatal() {
                    tracing::error!(error = %error, "fatal provider failure, closing session");
                    return Err(());
                }
                self.phase = Phase::Idle;
            }
        }
        Ok(())
    }

    /// Returns true when the session should close.
    async fn check_timeouts(&mut self) -> bool {
        let timeouts = &self.settings.timeouts;

        if self.last_activity.elapsed() >= Duration::from_secs(timeouts.idle_session_secs) {
            tracing::info!(session_id = %self.session_id, "idle session timeout");
            return true;
        }

        if self.phase == Phase::Listening
            && self.last_stt_activity.elapsed()
                >= Duration::from_secs(timeouts.stt_inactivity_secs)
        {
            let error = Error::Timeout("stt_inactivity");
            tracing::warn!(session_id = %self.session_id, "STT inactivity timeout");
            self.emit_error(&error).await;
            self.utterance = None;
            self.vad.reset();
            self.phase = Phase::Idle;
        }

        false
    }

    async fn emit_error(&self, error: &Error) {
        self.egress
            .emit(
                self.generation,
                ServerMessage::Error {
                    kind: error.kind_str().to_string(),
                    message: error.to_string(),
                },
            )
            .await;
    }
}

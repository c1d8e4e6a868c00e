//! End-to-end dialog flow tests
//!
//! Drives the real controller/egress/generation wiring with scripted
//! provider fakes over the session channel surface, the same way the
//! websocket bridge does in production.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use voiceline_config::Settings;
use voiceline_core::audio::{pcm16_to_bytes, FRAME_SAMPLES};
use voiceline_core::traits::VoiceSettings;
use voiceline_core::{
    AgentProfile, ChatRequest, Error, LanguageModel, Result, SpeechToText, StreamChunk, SttAudio,
    SttEvent, SttUtterance, SynthesizedAudio, TextToSpeech, Transcript,
};
use voiceline_pipeline::{spawn_session, AgentLookup, ArtifactStore, Inbound, Providers, SessionParams};

// ---------------------------------------------------------------------------
// Scripted providers
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct UtteranceScript {
    interims: Vec<&'static str>,
    outcome: UtteranceOutcome,
}

#[derive(Clone)]
enum UtteranceOutcome {
    Final(&'static str),
    Failed,
}

struct ScriptedStt {
    scripts: Mutex<VecDeque<UtteranceScript>>,
}

impl ScriptedStt {
    fn new(scripts: Vec<UtteranceScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
        })
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn start_utterance(&self) -> Result<SttUtterance> {
        let script = self.scripts.lock().pop_front().unwrap_or(UtteranceScript {
            interims: vec![],
            outcome: UtteranceOutcome::Final(""),
        });

        let (audio_tx, mut audio_rx) = mpsc::channel::<SttAudio>(64);
        let (event_tx, event_rx) = mpsc::channel::<SttEvent>(16);

        tokio::spawn(async move {
            let mut interims_sent = false;
            while let Some(command) = audio_rx.recv().await {
                match command {
                    SttAudio::Pcm(_) => {
                        if !interims_sent {
                            interims_sent = true;
                            for interim in &script.interims {
                                let event = SttEvent::Interim(Transcript::interim(*interim, 0.7));
                                if event_tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    SttAudio::Finish => break,
                }
            }
            let event = match script.outcome {
                UtteranceOutcome::Final(text) => SttEvent::Final(Transcript::final_(text, 0.95)),
                UtteranceOutcome::Failed => {
                    SttEvent::Failed(Error::transient("stt", "connection dropped"))
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

#[derive(Clone)]
enum LlmScript {
    /// Emit each fragment, then complete.
    Chunks(Vec<&'static str>),
    /// Emit each fragment with a delay between them, then complete.
    SlowChunks(Vec<&'static str>, Duration),
    /// Emit each fragment, then fail mid-stream.
    ChunksThenError(Vec<&'static str>),
    /// Fail before producing anything.
    FailImmediately,
}

struct ScriptedLlm {
    scripts: Mutex<VecDeque<LlmScript>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    fn new(scripts: Vec<LlmScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn generate_stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        self.requests.lock().push(request);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(LlmScript::Chunks(vec![]));

        if matches!(script, LlmScript::FailImmediately) {
            return Err(Error::transient("llm", "connect refused"));
        }

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            match script {
                LlmScript::Chunks(chunks) => {
                    for chunk in chunks {
                        if tx.send(Ok(StreamChunk::text(chunk))).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(Ok(StreamChunk::done())).await;
                }
                LlmScript::SlowChunks(chunks, delay) => {
                    for chunk in chunks {
                        if tx.send(Ok(StreamChunk::text(chunk))).await.is_err() {
                            return;
                        }
                        tokio::time::sleep(delay).await;
                    }
                    let _ = tx.send(Ok(StreamChunk::done())).await;
                }
                LlmScript::ChunksThenError(chunks) => {
                    for chunk in chunks {
                        if tx.send(Ok(StreamChunk::text(chunk))).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx
                        .send(Err(Error::transient("llm", "stream reset")))
                        .await;
                }
                LlmScript::FailImmediately => unreachable!(),
            }
        });
        Ok(rx)
    }
}

/// TTS fake: audio bytes are the unit text; units containing the marker
/// fail.
struct ScriptedTts {
    fail_marker: Option<&'static str>,
}

impl ScriptedTts {
    fn new() -> Arc<Self> {
        Arc::new(Self { fail_marker: None })
    }

    fn failing_on(marker: &'static str) -> Arc<Self> {
        Arc::new(Self {
            fail_marker: Some(marker),
        })
    }
}

#[async_trait]
impl TextToSpeech for ScriptedTts {
    async fn synthesize(&self, text: &str, _voice: &VoiceSettings) -> Result<SynthesizedAudio> {
        if let Some(marker) = self.fail_marker {
            if text.contains(marker) {
                return Err(Error::transient("tts", "synthesis rejected"));
            }
        }
        Ok(SynthesizedAudio {
            bytes: text.as_bytes().to_vec(),
            content_type: "audio/mpeg".to_string(),
        })
    }
}

#[derive(Default)]
struct MemoryArtifacts {
    entries: Mutex<HashMap<String, (String, Vec<u8>)>>,
    counter: Mutex<u64>,
}

impl MemoryArtifacts {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(id).map(|(_, bytes)| bytes.clone())
    }
}

impl ArtifactStore for MemoryArtifacts {
    fn put(&self, session_id: &str, bytes: Vec<u8>, _content_type: String) -> String {
        let mut counter = self.counter.lock();
        let id = format!("artifact-{}", *counter);
        *counter += 1;
        self.entries
            .lock()
            .insert(id.clone(), (session_id.to_string(), bytes));
        id
    }
}

struct TestAgents;

impl AgentLookup for TestAgents {
    fn get(&self, agent_id: &str) -> Option<AgentProfile> {
        (agent_id == "a1").then(|| AgentProfile {
            id: "a1".to_string(),
            name: "Test Agent".to_string(),
            greeting: "Hello!".to_string(),
            current_date_enabled: false,
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    inbound: mpsc::Sender<Inbound>,
    out_rx: mpsc::Receiver<String>,
    artifacts: Arc<MemoryArtifacts>,
}

impl Harness {
    fn spawn(stt: Arc<ScriptedStt>, llm: Arc<ScriptedLlm>, tts: Arc<dyn TextToSpeech>) -> Self {
        let artifacts = MemoryArtifacts::new();
        let (out_tx, out_rx) = mpsc::channel(256);
        let params = SessionParams {
            session_id: "test-session".to_string(),
            settings: Settings::default(),
            caller_info: None,
        };
        let handle = spawn_session(
            params,
            Providers { stt, llm, tts },
            Arc::new(TestAgents),
            artifacts.clone(),
            out_tx,
        );
        Self {
            inbound: handle.inbound,
            out_rx,
            artifacts,
        }
    }

    async fn send_control(&self, json: &str) {
        self.inbound
            .send(Inbound::Control(json.to_string()))
            .await
            .expect("controller alive");
    }

    async fn handshake(&self) {
        self.send_control(
            r#"{"type":"audio_config","sample_rate":8000,"encoding":"LINEAR16","channels":1}"#,
        )
        .await;
    }

    async fn send_frames(&self, amplitude: i16, count: usize) {
        let frame = vec![amplitude; FRAME_SAMPLES];
        let bytes = pcm16_to_bytes(&frame);
        for _ in 0..count {
            self.inbound
                .send(Inbound::Audio(bytes.clone()))
                .await
                .expect("controller alive");
        }
    }

    /// Speak: onset frames, a beat for interims, then the silence tail
    /// that closes the utterance.
    async fn speak(&self) {
        self.send_frames(5000, 5).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.send_frames(0, 27).await;
    }

    async fn next_msg(&mut self) -> serde_json::Value {
        let text = tokio::time::timeout(Duration::from_secs(2), self.out_rx.recv())
            .await
            .expect("timed out waiting for egress message")
            .expect("egress channel open");
        serde_json::from_str(&text).expect("egress messages are JSON")
    }

    /// Read the next message and assert its type.
    async fn expect(&mut self, expected: &str) -> serde_json::Value {
        let msg = self.next_msg().await;
        assert_eq!(
            msg["type"], expected,
            "expected {expected}, got {msg}"
        );
        msg
    }

    /// Assert nothing is emitted within the window.
    async fn expect_silence(&mut self, window: Duration) {
        let result = tokio::time::timeout(window, self.out_rx.recv()).await;
        assert!(result.is_err(), "expected silence, got {result:?}");
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// S1: greeting text and greeting audio on agent selection, with the
/// artifact retrievable.
#[tokio::test]
async fn greeting_flow_emits_text_then_audio() {
    let stt = ScriptedStt::new(vec![]);
    let llm = ScriptedLlm::new(vec![]);
    let mut h = Harness::spawn(stt, llm, ScriptedTts::new());

    h.send_control(r#"{"type":"agent_config","agent_id":"a1"}"#).await;

    let greeting = h.expect("agent_greeting").await;
    assert_eq!(greeting["text"], "Hello!");

    let audio = h.expect("greeting_audio").await;
    assert_eq!(audio["text"], "Hello!");
    let url = audio["audio_url"].as_str().unwrap();
    let id = url.strip_prefix("/audio/").unwrap();
    assert_eq!(h.artifacts.get(id).unwrap(), b"Hello!".to_vec());
}

#[tokio::test]
async fn unknown_agent_is_a_non_fatal_error() {
    let stt = ScriptedStt::new(vec![]);
    let llm = ScriptedLlm::new(vec![]);
    let mut h = Harness::spawn(stt, llm, ScriptedTts::new());

    h.send_control(r#"{"type":"agent_config","agent_id":"ghost"}"#).await;
    let error = h.expect("error").await;
    assert_eq!(error["kind"], "unknown_agent");

    // The session survives.
    h.send_control(r#"{"type":"call_started"}"#).await;
    h.expect_silence(Duration::from_millis(100)).await;
}

/// S2: a clean audio turn produces interims, the user transcript, text
/// chunks, an audio chunk, and stream_complete, in order.
#[tokio::test]
async fn clean_turn_orders_transcripts_text_and_audio() {
    let stt = ScriptedStt::new(vec![UtteranceScript {
        interims: vec!["what", "what time is it"],
        outcome: UtteranceOutcome::Final("What time is it?"),
    }]);
    let llm = ScriptedLlm::new(vec![LlmScript::Chunks(vec![
        "It is ",
        "three in ",
        "the afternoon.",
    ])]);
    let mut h = Harness::spawn(stt, llm.clone(), ScriptedTts::new());
    h.handshake().await;

    h.speak().await;

    h.expect("speech_start").await;
    let first = h.expect("interim_transcript").await;
    assert_eq!(first["text"], "what");
    let second = h.expect("interim_transcript").await;
    assert_eq!(second["text"], "what time is it");
    h.expect("speech_end").await;

    let transcript = h.expect("user_transcript").await;
    assert_eq!(transcript["text"], "What time is it?");
    h.expect("stream_start").await;

    let mut streamed = String::new();
    for expected in ["It is ", "three in ", "the afternoon."] {
        let chunk = h.expect("text_chunk").await;
        assert_eq!(chunk["text"], expected);
        streamed.push_str(expected);
    }

    let audio = h.expect("audio_chunk").await;
    assert_eq!(audio["text"], "It is three in the afternoon.");
    assert_eq!(audio["unit_index"], 0);
    let id = audio["audio_url"]
        .as_str()
        .unwrap()
        .strip_prefix("/audio/")
        .unwrap()
        .to_string();
    assert!(h.artifacts.get(&id).is_some());

    let complete = h.expect("stream_complete").await;
    assert_eq!(complete["full_text"], streamed);
    assert_eq!(complete["interrupted"], false);

    // Timestamps are monotonic floats.
    assert!(complete["timestamp"].as_f64().unwrap() >= transcript["timestamp"].as_f64().unwrap());

    // The LLM saw the user's words verbatim.
    let requests = llm.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0]
        .messages
        .iter()
        .any(|m| m.content == "What time is it?"));
}

/// S3: speech during generation supersedes the stream: prior generation
/// closes interrupted, playback stops, and the next turn's history holds
/// exactly the delivered prefix.
#[tokio::test]
async fn barge_in_supersedes_and_truncates_history() {
    let stt = ScriptedStt::new(vec![
        UtteranceScript {
            interims: vec![],
            outcome: UtteranceOutcome::Final("Tell me a story"),
        },
        UtteranceScript {
            interims: vec![],
            outcome: UtteranceOutcome::Final("Never mind."),
        },
    ]);
    let many: Vec<&'static str> = vec!["Once upon a time "; 40];
    let llm = ScriptedLlm::new(vec![
        LlmScript::SlowChunks(many, Duration::from_millis(20)),
        LlmScript::Chunks(vec!["Okay."]),
    ]);
    let mut h = Harness::spawn(stt, llm.clone(), ScriptedTts::new());
    h.handshake().await;

    h.speak().await;
    h.expect("speech_start").await;
    h.expect("speech_end").await;
    h.expect("user_transcript").await;
    h.expect("stream_start").await;

    // Wait for streaming to be underway, then barge in.
    let first_chunk = h.expect("text_chunk").await;
    let mut delivered = first_chunk["text"].as_str().unwrap().to_string();
    h.send_frames(5000, 5).await;

    // Drain until the interrupted completion; every message until then
    // is prior-generation content.
    let complete = loop {
        let msg = h.next_msg().await;
        match msg["type"].as_str().unwrap() {
            "text_chunk" => delivered.push_str(msg["text"].as_str().unwrap()),
            "audio_chunk" => {}
            "stream_complete" => break msg,
            other => panic!("unexpected message during barge-in: {other}"),
        }
    };
    assert_eq!(complete["interrupted"], true);
    assert_eq!(complete["full_text"].as_str().unwrap(), delivered);

    h.expect("stop_audio_immediately").await;
    h.expect("speech_start").await;

    // Close out the second utterance and turn.
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.send_frames(0, 27).await;
    h.expect("speech_end").await;
    let transcript = h.expect("user_transcript").await;
    assert_eq!(transcript["text"], "Never mind.");
    h.expect("stream_start").await;
    let chunk = h.expect("text_chunk").await;
    assert_eq!(chunk["text"], "Okay.");
    h.expect("audio_chunk").await;
    let done = h.expect("stream_complete").await;
    assert_eq!(done["interrupted"], false);

    // The second request's history retains the truncated assistant text
    // exactly as delivered.
    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    let history = &requests[1].messages;
    assert!(history.iter().any(|m| m.content == delivered));
    assert!(history.iter().any(|m| m.content == "Tell me a story"));
}

/// S4: an LLM failure mid-stream completes the turn with the partial
/// text; audio for already-chunked units still flows.
#[tokio::test]
async fn llm_midstream_failure_keeps_partial_response() {
    let stt = ScriptedStt::new(vec![UtteranceScript {
        interims: vec![],
        outcome: UtteranceOutcome::Final("Go on"),
    }]);
    let llm = ScriptedLlm::new(vec![LlmScript::ChunksThenError(vec![
        "Alpha. ",
        "Beta. ",
        "Gamma",
    ])]);
    let mut h = Harness::spawn(stt, llm, ScriptedTts::new());
    h.handshake().await;

    h.speak().await;
    h.expect("speech_start").await;
    h.expect("speech_end").await;
    h.expect("user_transcript").await;
    h.expect("stream_start").await;

    for expected in ["Alpha. ", "Beta. ", "Gamma"] {
        let chunk = h.expect("text_chunk").await;
        assert_eq!(chunk["text"], expected);
    }

    // Units are emitted in order with verbatim spans.
    let first = h.expect("audio_chunk").await;
    assert_eq!(first["text"], "Alpha.");
    let second = h.expect("audio_chunk").await;
    assert_eq!(second["text"], " Beta.");
    let third = h.expect("audio_chunk").await;
    assert_eq!(third["text"], " Gamma");

    let complete = h.expect("stream_complete").await;
    assert_eq!(complete["full_text"], "Alpha. Beta. Gamma");
    assert_eq!(complete["interrupted"], false);
}

/// An LLM that fails before any fragment surfaces a transient error and
/// leaves the session usable.
#[tokio::test]
async fn llm_upfront_failure_is_transient() {
    let stt = ScriptedStt::new(vec![
        UtteranceScript {
            interims: vec![],
            outcome: UtteranceOutcome::Final("Hello?"),
        },
        UtteranceScript {
            interims: vec![],
            outcome: UtteranceOutcome::Final("Hello again"),
        },
    ]);
    let llm = ScriptedLlm::new(vec![
        LlmScript::FailImmediately,
        LlmScript::Chunks(vec!["Hi."]),
    ]);
    let mut h = Harness::spawn(stt, llm.clone(), ScriptedTts::new());
    h.handshake().await;

    h.speak().await;
    h.expect("speech_start").await;
    h.expect("speech_end").await;
    h.expect("user_transcript").await;
    h.expect("stream_start").await;
    let error = h.expect("error").await;
    assert_eq!(error["kind"], "provider_transient");

    // Next turn works, and its history does not contain the failed turn.
    h.speak().await;
    h.expect("speech_start").await;
    h.expect("speech_end").await;
    h.expect("user_transcript").await;
    h.expect("stream_start").await;
    h.expect("text_chunk").await;
    h.expect("audio_chunk").await;
    h.expect("stream_complete").await;

    let requests = llm.requests();
    assert!(!requests[1].messages.iter().any(|m| m.content == "Hello?"));
}

/// S5: sustained silence produces no messages at all.
#[tokio::test]
async fn silence_emits_nothing() {
    let stt = ScriptedStt::new(vec![]);
    let llm = ScriptedLlm::new(vec![]);
    let mut h = Harness::spawn(stt, llm, ScriptedTts::new());
    h.handshake().await;

    h.send_frames(0, 60).await;
    h.expect_silence(Duration::from_millis(200)).await;
}

/// Speech that transcribes to nothing discards the turn without history
/// or stream messages.
#[tokio::test]
async fn empty_final_transcript_discards_turn() {
    let stt = ScriptedStt::new(vec![UtteranceScript {
        interims: vec![],
        outcome: UtteranceOutcome::Final(""),
    }]);
    let llm = ScriptedLlm::new(vec![]);
    let mut h = Harness::spawn(stt, llm.clone(), ScriptedTts::new());
    h.handshake().await;

    h.speak().await;
    h.expect("speech_start").await;
    h.expect("speech_end").await;
    h.expect_silence(Duration::from_millis(200)).await;
    assert!(llm.requests().is_empty());
}

/// An empty LLM response closes the stream with an empty body and no
/// audio chunks.
#[tokio::test]
async fn empty_llm_response_completes_empty() {
    let stt = ScriptedStt::new(vec![UtteranceScript {
        interims: vec![],
        outcome: UtteranceOutcome::Final("Anything?"),
    }]);
    let llm = ScriptedLlm::new(vec![LlmScript::Chunks(vec![])]);
    let mut h = Harness::spawn(stt, llm, ScriptedTts::new());
    h.handshake().await;

    h.speak().await;
    h.expect("speech_start").await;
    h.expect("speech_end").await;
    h.expect("user_transcript").await;
    h.expect("stream_start").await;
    let complete = h.expect("stream_complete").await;
    assert_eq!(complete["full_text"], "");
    assert_eq!(complete["interrupted"], false);
}

/// A failed synthesis unit is skipped with a warning marker; later units
/// still arrive in order.
#[tokio::test]
async fn tts_unit_failure_skips_only_that_unit() {
    let stt = ScriptedStt::new(vec![UtteranceScript {
        interims: vec![],
        outcome: UtteranceOutcome::Final("Read the list"),
    }]);
    let llm = ScriptedLlm::new(vec![LlmScript::Chunks(vec![
        "Good. ",
        "skip this. ",
        "Fine.",
    ])]);
    let mut h = Harness::spawn(stt, llm, ScriptedTts::failing_on("skip"));
    h.handshake().await;

    h.speak().await;
    h.expect("speech_start").await;
    h.expect("speech_end").await;
    h.expect("user_transcript").await;
    h.expect("stream_start").await;
    for _ in 0..3 {
        h.expect("text_chunk").await;
    }

    let first = h.expect("audio_chunk").await;
    assert_eq!(first["text"], "Good.");
    let warning = h.expect("error").await;
    assert_eq!(warning["kind"], "provider_transient");
    let third = h.expect("audio_chunk").await;
    assert_eq!(third["text"], " Fine.");
    assert_eq!(third["unit_index"], 2);

    let complete = h.expect("stream_complete").await;
    assert_eq!(complete["interrupted"], false);
}

/// A failed STT stream surfaces a transient error and returns to idle
/// with history untouched.
#[tokio::test]
async fn stt_failure_surfaces_error_and_recovers() {
    let stt = ScriptedStt::new(vec![
        UtteranceScript {
            interims: vec![],
            outcome: UtteranceOutcome::Failed,
        },
        UtteranceScript {
            interims: vec![],
            outcome: UtteranceOutcome::Final("Second try"),
        },
    ]);
    let llm = ScriptedLlm::new(vec![LlmScript::Chunks(vec!["Done."])]);
    let mut h = Harness::spawn(stt, llm.clone(), ScriptedTts::new());
    h.handshake().await;

    h.speak().await;
    h.expect("speech_start").await;
    h.expect("speech_end").await;
    let error = h.expect("error").await;
    assert_eq!(error["kind"], "provider_transient");

    h.speak().await;
    h.expect("speech_start").await;
    h.expect("speech_end").await;
    let transcript = h.expect("user_transcript").await;
    assert_eq!(transcript["text"], "Second try");
}

/// Round-trip: a `message` frame with empty history yields a turn whose
/// user side is byte-for-byte the content, whitespace included.
#[tokio::test]
async fn text_message_round_trips_verbatim() {
    let stt = ScriptedStt::new(vec![]);
    let llm = ScriptedLlm::new(vec![LlmScript::Chunks(vec!["Sure."])]);
    let mut h = Harness::spawn(stt, llm.clone(), ScriptedTts::new());

    h.send_control(r#"{"type":"message","content":"  What's the plan?  "}"#)
        .await;

    let transcript = h.expect("user_transcript").await;
    assert_eq!(transcript["text"], "  What's the plan?  ");
    h.expect("stream_start").await;
    h.expect("text_chunk").await;
    h.expect("audio_chunk").await;
    h.expect("stream_complete").await;

    let requests = llm.requests();
    assert!(requests[0]
        .messages
        .iter()
        .any(|m| m.content == "  What's the plan?  "));
}

/// Back-to-back interrupts from idle are a no-op; during generation the
/// first one supersedes and the second is absorbed.
#[tokio::test]
async fn interrupts_are_idempotent() {
    let stt = ScriptedStt::new(vec![]);
    let many: Vec<&'static str> = vec!["word "; 40];
    let llm = ScriptedLlm::new(vec![LlmScript::SlowChunks(many, Duration::from_millis(20))]);
    let mut h = Harness::spawn(stt, llm, ScriptedTts::new());

    // From idle: nothing happens.
    h.send_control(r#"{"type":"interrupt"}"#).await;
    h.send_control(r#"{"type":"interrupt"}"#).await;
    h.expect_silence(Duration::from_millis(150)).await;

    // Start a text turn, then double-interrupt mid-stream.
    h.send_control(r#"{"type":"message","content":"go"}"#).await;
    h.expect("user_transcript").await;
    h.expect("stream_start").await;
    h.expect("text_chunk").await;

    h.send_control(r#"{"type":"interrupt","reason":"user_tapped_stop"}"#)
        .await;
    h.send_control(r#"{"type":"interrupt"}"#).await;

    let complete = loop {
        let msg = h.next_msg().await;
        match msg["type"].as_str().unwrap() {
            "text_chunk" | "audio_chunk" => continue,
            "stream_complete" => break msg,
            other => panic!("unexpected message: {other}"),
        }
    };
    assert_eq!(complete["interrupted"], true);
    h.expect("stop_audio_immediately").await;

    // Exactly one supersession: nothing further follows.
    h.expect_silence(Duration::from_millis(300)).await;
}

/// PCM before the handshake is discarded; the handshake gates STT, not
/// control frames.
#[tokio::test]
async fn pcm_before_handshake_is_ignored() {
    let stt = ScriptedStt::new(vec![UtteranceScript {
        interims: vec![],
        outcome: UtteranceOutcome::Final("hello"),
    }]);
    let llm = ScriptedLlm::new(vec![LlmScript::Chunks(vec!["Hi."])]);
    let mut h = Harness::spawn(stt, llm, ScriptedTts::new());

    h.send_frames(5000, 5).await;
    h.expect_silence(Duration::from_millis(150)).await;

    h.handshake().await;
    h.speak().await;
    h.expect("speech_start").await;
}

/// A bad handshake is fatal: the error goes out and the session closes.
#[tokio::test]
async fn invalid_handshake_closes_the_session() {
    let stt = ScriptedStt::new(vec![]);
    let llm = ScriptedLlm::new(vec![]);
    let mut h = Harness::spawn(stt, llm, ScriptedTts::new());

    h.send_control(
        r#"{"type":"audio_config","sample_rate":44100,"encoding":"LINEAR16","channels":2}"#,
    )
    .await;

    let error = h.expect("error").await;
    assert_eq!(error["kind"], "protocol_error");

    // Controller gone: the egress channel drains to closed.
    let next = tokio::time::timeout(Duration::from_secs(1), h.out_rx.recv()).await;
    assert!(matches!(next, Ok(None)));
}

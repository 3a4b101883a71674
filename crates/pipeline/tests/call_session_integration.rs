//! Integration tests for the call session (recognition -> dialog -> synthesis)
//!
//! External services are replaced by in-process doubles; time is paused so
//! timer-driven behaviour is exact.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use voxcall_core::{
    AudioByteStream, AudioFormat, AudioFrame, AudioSink, ConversationState, Error, ErrorKind,
    FinishReason, GenerateRequest, GenerateStream, Message, RecognitionConfig,
    RecognitionSession, RecognizeStream, Result, Role, Service, StreamChunk, SynthesizeStream,
    TokenStream, TranscriptEvent, TurnOutcome, TurnRecord, TurnRecordSink,
};
use voxcall_config::VadModel;
use voxcall_pipeline::{CallServices, CallSession, SessionConfig, SessionInput, SessionSummary};

// ---------------------------------------------------------------------------
// Doubles
// ---------------------------------------------------------------------------

/// Hands the test's transcript channel to the first connection
struct TestRecognizer {
    events: Mutex<Option<mpsc::Receiver<Result<TranscriptEvent>>>>,
}

#[async_trait]
impl RecognizeStream for TestRecognizer {
    async fn connect(&self, _config: &RecognitionConfig) -> Result<RecognitionSession> {
        let events = self
            .events
            .lock()
            .take()
            .ok_or_else(|| Error::connect(Service::Recognizer, "refused"))?;
        let (audio_tx, mut audio_rx) = mpsc::channel::<AudioFrame>(64);
        tokio::spawn(async move { while audio_rx.recv().await.is_some() {} });
        Ok(RecognitionSession { audio_tx, events })
    }

    fn provider_name(&self) -> &str {
        "test"
    }
}

enum Script {
    /// Whole reply, streamed word by word
    Reply(&'static str),
    /// Reply with a pause before every word
    Slow(&'static str, Duration),
    /// Stream `text`, then fail mid-stream
    BreakAfter(&'static str),
}

#[derive(Default)]
struct ScriptedLlm {
    scripts: Mutex<VecDeque<Script>>,
    /// Connection attempts to refuse before answering
    refusals: Mutex<u32>,
    requests: Mutex<Vec<(Instant, GenerateRequest)>>,
    cancels: Mutex<Vec<CancellationToken>>,
}

impl ScriptedLlm {
    fn with(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    fn refusing(self, attempts: u32) -> Self {
        *self.refusals.lock() = attempts;
        self
    }

    fn request(&self, index: usize) -> Vec<Message> {
        self.requests.lock()[index].1.messages.clone()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

fn words(text: &str) -> Vec<Result<StreamChunk>> {
    text.split_inclusive(' ')
        .map(|w| Ok(StreamChunk::text(w)))
        .collect()
}

#[async_trait]
impl GenerateStream for ScriptedLlm {
    async fn generate_stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream> {
        {
            let mut refusals = self.refusals.lock();
            if *refusals > 0 {
                *refusals -= 1;
                return Err(Error::connect(Service::Generator, "connection refused"));
            }
        }
        self.requests.lock().push((Instant::now(), request));
        self.cancels.lock().push(cancel);

        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Reply("Okay."));
        let stream: TokenStream = match script {
            Script::Reply(text) => {
                let mut items = words(text);
                items.push(Ok(StreamChunk::final_chunk(FinishReason::Stop)));
                Box::pin(stream::iter(items))
            }
            Script::Slow(text, delay) => {
                let items = words(text);
                Box::pin(async_stream::stream! {
                    for item in items {
                        tokio::time::sleep(delay).await;
                        yield item;
                    }
                    yield Ok(StreamChunk::final_chunk(FinishReason::Stop));
                })
            }
            Script::BreakAfter(text) => {
                let mut items = words(text);
                items.push(Err(Error::stream(Service::Generator, "connection reset")));
                Box::pin(stream::iter(items))
            }
        };
        Ok(stream)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Answers every chunk with `bytes` of µ-law silence
struct TestSynth {
    bytes: usize,
    texts: Mutex<Vec<String>>,
}

impl TestSynth {
    fn new(audio_ms: usize) -> Self {
        Self {
            bytes: audio_ms * 8,
            texts: Mutex::new(Vec::new()),
        }
    }

    fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

#[async_trait]
impl SynthesizeStream for TestSynth {
    async fn synthesize(&self, text: &str, _cancel: CancellationToken) -> Result<AudioByteStream> {
        self.texts.lock().push(text.to_string());
        let audio = vec![AudioFormat::telephony().encoding.silence_byte(); self.bytes];
        Ok(Box::pin(stream::iter(vec![Ok(audio)])))
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::telephony()
    }

    fn provider_name(&self) -> &str {
        "test"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkEvent {
    Frame,
    Clear,
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    clears: AtomicUsize,
}

impl RecordingSink {
    fn frames(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| **e == SinkEvent::Frame)
            .count()
    }

    fn frames_after_clear(&self) -> usize {
        let events = self.events.lock();
        match events.iter().position(|e| *e == SinkEvent::Clear) {
            Some(at) => events[at..]
                .iter()
                .filter(|e| **e == SinkEvent::Frame)
                .count(),
            None => 0,
        }
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn send_frame(&self, _frame: AudioFrame) -> Result<()> {
        self.events.lock().push(SinkEvent::Frame);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(SinkEvent::Clear);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingTurns {
    records: Mutex<Vec<TurnRecord>>,
}

impl RecordingTurns {
    fn outcomes(&self) -> Vec<TurnOutcome> {
        self.records.lock().iter().map(|r| r.outcome).collect()
    }
}

impl TurnRecordSink for RecordingTurns {
    fn record(&self, record: &TurnRecord) {
        self.records.lock().push(record.clone());
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    transcripts: mpsc::Sender<Result<TranscriptEvent>>,
    inbound: mpsc::Sender<SessionInput>,
    states: broadcast::Receiver<ConversationState>,
    llm: Arc<ScriptedLlm>,
    tts: Arc<TestSynth>,
    sink: Arc<RecordingSink>,
    turns: Arc<RecordingTurns>,
    task: JoinHandle<Result<SessionSummary>>,
}

impl Harness {
    fn start(config: SessionConfig, llm: ScriptedLlm, tts: TestSynth) -> Self {
        let (transcripts, transcript_rx) = mpsc::channel(32);
        let recognizer = Arc::new(TestRecognizer {
            events: Mutex::new(Some(transcript_rx)),
        });
        Self::with_recognizer(config, recognizer, llm, tts, transcripts)
    }

    fn with_recognizer(
        config: SessionConfig,
        recognizer: Arc<TestRecognizer>,
        llm: ScriptedLlm,
        tts: TestSynth,
        transcripts: mpsc::Sender<Result<TranscriptEvent>>,
    ) -> Self {
        let llm = Arc::new(llm);
        let tts = Arc::new(tts);
        let sink = Arc::new(RecordingSink::default());
        let turns = Arc::new(RecordingTurns::default());
        let services = CallServices {
            recognizer,
            llm: llm.clone(),
            tts: tts.clone(),
            sink: sink.clone(),
            turn_sink: turns.clone(),
        };

        let session = CallSession::new("CA-test", "MZ-test", config, services);
        let states = session.subscribe();
        let (inbound, inbound_rx) = mpsc::channel(128);
        let task = tokio::spawn(session.run(inbound_rx, CancellationToken::new()));

        Self {
            transcripts,
            inbound,
            states,
            llm,
            tts,
            sink,
            turns,
            task,
        }
    }

    async fn interim(&self, text: &str) {
        self.transcripts
            .send(Ok(TranscriptEvent::interim(text)))
            .await
            .unwrap();
    }

    async fn next_state(&mut self) -> ConversationState {
        timeout(Duration::from_secs(30), self.states.recv())
            .await
            .expect("no state change")
            .expect("state channel closed")
    }

    /// Skip ahead to `expected`
    async fn wait_for(&mut self, expected: ConversationState) {
        while self.next_state().await != expected {}
    }

    async fn stop(self) -> SessionSummary {
        let _ = self.inbound.send(SessionInput::Stop).await;
        self.task.await.unwrap().unwrap()
    }
}

fn quiet_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.echo.enabled = false;
    // Synthetic tones are speech only to the energy scorer
    config.vad.model = VadModel::Energy;
    config
}

fn loud_frame(seq: u64) -> AudioFrame {
    let samples: Vec<f32> = (0..160).map(|i| (i as f32 * 0.7).sin() * 0.6).collect();
    AudioFrame::from_samples(&samples, AudioFormat::telephony(), seq)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Interim text followed by silence finalizes after the silence threshold
#[tokio::test(start_paused = true)]
async fn test_silence_finalizes_utterance() {
    let mut harness = Harness::start(
        quiet_config(),
        ScriptedLlm::with(vec![Script::Reply("We open at noon. See you then.")]),
        TestSynth::new(200),
    );

    let spoken_at = Instant::now();
    harness.interim("i would like a table for four").await;

    assert_eq!(harness.next_state().await, ConversationState::UserSpeaking);
    assert_eq!(harness.next_state().await, ConversationState::Thinking);

    let (requested_at, request) = harness.llm.requests.lock()[0].clone();
    assert_eq!(requested_at - spoken_at, Duration::from_millis(180));
    assert_eq!(
        request.messages.last(),
        Some(&Message::user("i would like a table for four"))
    );

    assert_eq!(harness.next_state().await, ConversationState::Speaking);
    assert_eq!(harness.next_state().await, ConversationState::Listening);

    // Chunks reach synthesis in generation order
    assert_eq!(harness.tts.texts(), vec!["We open at noon.", "See you then."]);
    assert!(harness.sink.frames() >= 20);

    let records = harness.turns.records.lock().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, TurnOutcome::Completed);
    assert_eq!(records[0].turn, 1);
    let summary = records[0].summary.unwrap();
    assert_eq!(summary.stt_ms, Some(180));

    let summary = harness.stop().await;
    assert_eq!(summary.turns, 1);
    assert_eq!(summary.barge_ins, 0);
}

/// Completed turns append exactly one assistant entry each
#[tokio::test(start_paused = true)]
async fn test_history_after_completed_turns() {
    let mut harness = Harness::start(
        quiet_config(),
        ScriptedLlm::with(vec![
            Script::Reply("Sure thing. What time?"),
            Script::Reply("Booked."),
        ]),
        TestSynth::new(100),
    );

    harness.interim("book me a table").await;
    harness.wait_for(ConversationState::Listening).await;
    harness.interim("seven tonight").await;
    harness.wait_for(ConversationState::Listening).await;

    let second = harness.llm.request(1);
    let roles: Vec<Role> = second.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(second[2].content, "Sure thing. What time?");
    assert_eq!(second[3].content, "seven tonight");

    assert_eq!(
        harness.turns.outcomes(),
        vec![TurnOutcome::Completed, TurnOutcome::Completed]
    );
    harness.stop().await;
}

/// Confident user speech during playback interrupts the agent once
#[tokio::test(start_paused = true)]
async fn test_barge_in_interrupts_playback() {
    let mut harness = Harness::start(
        quiet_config(),
        ScriptedLlm::with(vec![
            Script::Slow(
                "Our menu has many options. We serve pasta and salads. Desserts are homemade.",
                Duration::from_millis(40),
            ),
            Script::Reply("Of course."),
        ]),
        TestSynth::new(1000),
    );

    harness.interim("what is on the menu today").await;
    harness.wait_for(ConversationState::Speaking).await;

    for seq in 0..40 {
        harness
            .inbound
            .send(SessionInput::Audio(loud_frame(seq)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(harness.next_state().await, ConversationState::Interrupted);
    assert_eq!(harness.next_state().await, ConversationState::UserSpeaking);

    // Speech kept going after the interruption; the transport is cleared once
    assert_eq!(harness.sink.clears.load(Ordering::SeqCst), 1);
    assert_eq!(harness.sink.frames_after_clear(), 0);
    assert!(harness.llm.cancels.lock()[0].is_cancelled());
    assert_eq!(harness.turns.outcomes(), vec![TurnOutcome::Interrupted]);

    // The partial reply never reaches history
    harness.interim("actually make it vegetarian").await;
    harness.wait_for(ConversationState::Listening).await;
    let second = harness.llm.request(1);
    let roles: Vec<Role> = second.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::User]);

    let summary = harness.stop().await;
    assert_eq!(summary.barge_ins, 1);
    assert_eq!(summary.turns, 2);
}

/// Unavailable generator: retry once, then speak the fallback line
#[tokio::test(start_paused = true)]
async fn test_connection_failure_speaks_fallback() {
    let config = quiet_config();
    let fallback = config.dialog.fallback_line.clone();
    let mut harness = Harness::start(
        config,
        ScriptedLlm::default().refusing(2),
        TestSynth::new(200),
    );

    harness.interim("hello is anyone there").await;
    assert_eq!(harness.next_state().await, ConversationState::UserSpeaking);
    assert_eq!(harness.next_state().await, ConversationState::Thinking);
    assert_eq!(harness.next_state().await, ConversationState::Speaking);
    assert_eq!(harness.next_state().await, ConversationState::Listening);

    assert_eq!(harness.tts.texts(), vec![fallback]);
    assert_eq!(harness.turns.outcomes(), vec![TurnOutcome::Fallback]);
    assert_eq!(*harness.llm.refusals.lock(), 0);

    // The fallback line is not part of the conversation
    harness.interim("can you hear me now").await;
    harness.wait_for(ConversationState::Listening).await;
    let roles: Vec<Role> = harness.llm.request(0).iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::User]);

    harness.stop().await;
}

/// A stream dropping mid-reply discards the partial output
#[tokio::test(start_paused = true)]
async fn test_mid_stream_failure_returns_to_listening() {
    let mut harness = Harness::start(
        quiet_config(),
        ScriptedLlm::with(vec![Script::BreakAfter("Let me check. The kitchen")]),
        TestSynth::new(200),
    );

    harness.interim("is the kitchen open").await;
    harness.wait_for(ConversationState::Listening).await;

    assert_eq!(harness.turns.outcomes(), vec![TurnOutcome::Failed]);
    assert!(!harness
        .tts
        .texts()
        .iter()
        .any(|t| t.starts_with("Sorry")));

    harness.interim("hello").await;
    harness.wait_for(ConversationState::Listening).await;
    let roles: Vec<Role> = harness.llm.request(1).iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::User]);

    harness.stop().await;
}

/// The greeting plays before the first turn and joins the history
#[tokio::test(start_paused = true)]
async fn test_greeting_opens_the_call() {
    let mut config = quiet_config();
    config.dialog.greeting = Some("Thanks for calling. How can I help?".into());
    let mut harness = Harness::start(config, ScriptedLlm::default(), TestSynth::new(200));

    assert_eq!(harness.next_state().await, ConversationState::Speaking);
    assert_eq!(harness.next_state().await, ConversationState::Listening);
    assert_eq!(
        harness.tts.texts(),
        vec!["Thanks for calling. How can I help?"]
    );
    assert!(harness.turns.outcomes().is_empty());

    harness.interim("i have a question").await;
    harness.wait_for(ConversationState::Listening).await;
    let first = harness.llm.request(0);
    assert_eq!(
        first[1],
        Message::assistant("Thanks for calling. How can I help?")
    );

    harness.stop().await;
}

/// Transcripts arriving while a reply is pending do not start a second one
#[tokio::test(start_paused = true)]
async fn test_single_reply_in_flight() {
    let mut harness = Harness::start(
        quiet_config(),
        ScriptedLlm::with(vec![Script::Slow(
            "One moment please.",
            Duration::from_millis(300),
        )]),
        TestSynth::new(200),
    );

    harness.interim("where is my order").await;
    harness.wait_for(ConversationState::Thinking).await;
    harness.interim("where is my order now").await;
    harness
        .transcripts
        .send(Ok(TranscriptEvent::final_text("where is my order now")))
        .await
        .unwrap();

    harness.wait_for(ConversationState::Listening).await;
    assert_eq!(harness.llm.request_count(), 1);
    assert_eq!(harness.turns.outcomes(), vec![TurnOutcome::Completed]);

    harness.stop().await;
}

/// A recognizer that cannot be reached ends the call with its error
#[tokio::test(start_paused = true)]
async fn test_recognizer_outage_ends_session() {
    let (transcripts, _unused) = mpsc::channel(1);
    let recognizer = Arc::new(TestRecognizer {
        events: Mutex::new(None),
    });
    let harness = Harness::with_recognizer(
        quiet_config(),
        recognizer,
        ScriptedLlm::default(),
        TestSynth::new(200),
        transcripts,
    );

    let err = harness.task.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

/// Transcript text can confirm a barge-in when enabled
#[tokio::test(start_paused = true)]
async fn test_transcript_barge_in() {
    let mut config = quiet_config();
    config.barge_in.transcript_min_chars = Some(4);
    let mut harness = Harness::start(
        config,
        ScriptedLlm::with(vec![Script::Reply("Let me read the whole list for you.")]),
        TestSynth::new(2000),
    );

    harness.interim("what do you have").await;
    harness.wait_for(ConversationState::Speaking).await;

    harness.interim("ok").await;
    harness.interim("stop please").await;
    assert_eq!(harness.next_state().await, ConversationState::Interrupted);
    assert_eq!(harness.next_state().await, ConversationState::UserSpeaking);
    assert_eq!(harness.sink.clears.load(Ordering::SeqCst), 1);

    harness.stop().await;
}

/// Hanging up stops every worker and reports the call
#[tokio::test(start_paused = true)]
async fn test_stop_ends_session() {
    let harness = Harness::start(quiet_config(), ScriptedLlm::default(), TestSynth::new(200));
    let summary = harness.stop().await;
    assert_eq!(summary.turns, 0);
}

//! Call session orchestrator
//!
//! One session per call. The session task owns the conversation context
//! and is the only writer of state, history and metrics. Everything else
//! runs as a worker and reports back over channels:
//!
//! ```text
//! transport ──► ingest ─┬─► recognition ──► transcripts ─┐
//!                       └─► barge-in monitor ──► signals ─┤
//!                                                         ├─► session loop
//! endpointer timers ─────────────────────────────────────┤
//! job workers (generation, playback) ──► turn events ────┘
//! ```
//!
//! A job is one thing the agent says. At most one job is alive at a time;
//! starting another first cancels the current one and waits for its
//! workers. Barge-in cancellation likewise completes before the session
//! moves on, so a new turn never overlaps the old one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voxcall_config::{
    BargeInConfig, DialogConfig, EchoConfig, EndpointerConfig, RetryConfig, Settings,
    SynthesisConfig, VadConfig,
};
use voxcall_core::{
    AudioFormat, AudioFrame, AudioSink, ConversationState, Error, ErrorKind, GenerateRequest,
    GenerateStream, RecognitionConfig, RecognizeStream, Result, SampleRate, SynthesizeStream,
    TranscriptEvent, TurnOutcome, TurnRecordSink,
};

use crate::barge_in::{BargeInMonitor, BargeInSignal};
use crate::context::ConversationContext;
use crate::dialog::DialogEngine;
use crate::endpointer::{CompletionPolicy, EndpointDecision, Endpointer, PhrasePolicy};
use crate::metric_names;
use crate::recognition::RecognitionAdapter;
use crate::retry::RetryPolicy;
use crate::synthesis::{single_line, SpeechPlayer};
use crate::turn::{ActiveJob, JobId, JobKind, TurnEvent};
use crate::vad::VoiceActivityDetector;

const AUDIO_QUEUE: usize = 64;
const TRANSCRIPT_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 64;
const TIMER_QUEUE: usize = 16;
const SIGNAL_QUEUE: usize = 4;
const STATE_QUEUE: usize = 32;

/// Input from the audio transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Audio(AudioFrame),
    /// Caller hung up
    Stop,
}

/// Everything a session needs from configuration
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub endpointer: EndpointerConfig,
    pub dialog: DialogConfig,
    pub synthesis: SynthesisConfig,
    pub barge_in: BargeInConfig,
    pub echo: EchoConfig,
    pub vad: VadConfig,
    pub retry: RetryConfig,
    pub recognition: RecognitionConfig,
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let recognizer = &settings.recognizer;
        let sample_rate = SampleRate::from_hz(recognizer.sample_rate).ok_or_else(|| {
            Error::Config(format!("Unsupported sample rate: {}", recognizer.sample_rate))
        })?;

        Ok(Self {
            endpointer: settings.endpointer.clone(),
            dialog: settings.dialog.clone(),
            synthesis: settings.synthesis.clone(),
            barge_in: settings.barge_in.clone(),
            echo: settings.echo.clone(),
            vad: settings.vad.clone(),
            retry: settings.retry.clone(),
            recognition: RecognitionConfig {
                format: AudioFormat {
                    encoding: recognizer.encoding,
                    sample_rate,
                },
                language: recognizer.language.clone(),
                interim_results: true,
                endpointing_ms: recognizer.endpointing_ms,
                utterance_end_ms: recognizer.utterance_end_ms,
            },
        })
    }
}

/// External collaborators of one call
#[derive(Clone)]
pub struct CallServices {
    pub recognizer: Arc<dyn RecognizeStream>,
    pub llm: Arc<dyn GenerateStream>,
    pub tts: Arc<dyn SynthesizeStream>,
    pub sink: Arc<dyn AudioSink>,
    pub turn_sink: Arc<dyn TurnRecordSink>,
}

/// What a finished call looked like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub turns: u64,
    pub barge_ins: u32,
    pub duration: Duration,
}

/// A call, ready to run
pub struct CallSession {
    call_id: String,
    stream_id: String,
    config: SessionConfig,
    services: CallServices,
    policy: Arc<dyn CompletionPolicy>,
    states: broadcast::Sender<ConversationState>,
}

impl CallSession {
    pub fn new(
        call_id: impl Into<String>,
        stream_id: impl Into<String>,
        config: SessionConfig,
        services: CallServices,
    ) -> Self {
        let policy = Arc::new(PhrasePolicy::from_config(&config.endpointer));
        let (states, _) = broadcast::channel(STATE_QUEUE);
        Self {
            call_id: call_id.into(),
            stream_id: stream_id.into(),
            config,
            services,
            policy,
            states,
        }
    }

    /// Every state the session enters from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationState> {
        self.states.subscribe()
    }

    /// Replace the utterance completion heuristic
    pub fn with_policy(mut self, policy: Arc<dyn CompletionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Drive the call until the transport stops, `cancel` fires or the
    /// recognizer fails for good. All workers are stopped before returning.
    pub async fn run(
        self,
        inbound: mpsc::Receiver<SessionInput>,
        cancel: CancellationToken,
    ) -> Result<SessionSummary> {
        let started = Instant::now();
        let CallSession {
            call_id,
            stream_id,
            config,
            services,
            policy,
            states,
        } = self;
        tracing::info!(call_id = %call_id, stream_id = %stream_id, "Call session started");

        let session_cancel = cancel.child_token();
        let retry = RetryPolicy::from_config(&config.retry);

        let (timer_tx, mut timer_rx) = mpsc::channel(TIMER_QUEUE);
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let (recognizer_audio_tx, recognizer_audio_rx) = mpsc::channel(AUDIO_QUEUE);
        let (monitor_audio_tx, monitor_audio_rx) = mpsc::channel(AUDIO_QUEUE);
        let (reference_tx, reference_rx) = mpsc::channel(AUDIO_QUEUE);
        let (transcript_tx, mut transcript_rx) = mpsc::channel(TRANSCRIPT_QUEUE);
        let (signal_tx, mut signal_rx) = mpsc::channel(SIGNAL_QUEUE);
        let (speaking_tx, speaking_rx) = watch::channel(false);

        let workers: Vec<JoinHandle<()>> = vec![
            tokio::spawn(ingest(
                inbound,
                recognizer_audio_tx,
                monitor_audio_tx,
                stop_tx,
                session_cancel.clone(),
            )),
            tokio::spawn(
                RecognitionAdapter::new(
                    services.recognizer.clone(),
                    config.recognition.clone(),
                    retry,
                )
                .run(recognizer_audio_rx, transcript_tx, session_cancel.clone()),
            ),
            tokio::spawn(
                BargeInMonitor::new(&config.barge_in, &config.echo, &config.vad)
                    .with_vad(VoiceActivityDetector::from_config(
                        &config.vad,
                        config.recognition.format.sample_rate,
                    ))
                    .run(
                        monitor_audio_rx,
                        reference_rx,
                        speaking_rx,
                        signal_tx,
                        session_cancel.clone(),
                    ),
            ),
        ];

        let dialog = Arc::new(DialogEngine::new(
            services.llm.clone(),
            config.dialog.clone(),
            retry,
        ));
        let player = Arc::new(
            SpeechPlayer::new(
                services.tts.clone(),
                services.sink.clone(),
                config.synthesis.clone(),
                retry,
            )
            .with_reference(reference_tx),
        );
        let endpointer = Endpointer::new(config.endpointer.clone(), policy, timer_tx);
        let ctx = ConversationContext::new(
            call_id.as_str(),
            stream_id.as_str(),
            dialog.new_history(),
            endpointer,
        );

        let mut session = Session {
            ctx,
            join_timeout: Duration::from_millis(config.retry.cancel_join_ms),
            config,
            dialog,
            player,
            sink: services.sink.clone(),
            turn_sink: services.turn_sink.clone(),
            events_tx,
            speaking_tx,
            states,
            active: None,
            next_job: 0,
            cancel: session_cancel.clone(),
        };

        session.greet().await;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = session_cancel.cancelled() => break Ok(()),
                _ = stop_rx.recv() => break Ok(()),
                Some(signal) = signal_rx.recv() => session.on_audio_barge_in(signal).await,
                Some(event) = events_rx.recv() => session.on_turn_event(event).await,
                Some(fired) = timer_rx.recv() => {
                    let decision = session.ctx.endpointer.on_timer(fired);
                    session.apply_decision(decision).await;
                }
                transcript = transcript_rx.recv() => match transcript {
                    Some(Ok(event)) => session.on_transcript(event).await,
                    Some(Err(e)) => {
                        tracing::error!(call_id = %call_id, error = %e, "Recognition lost, ending call");
                        break Err(e);
                    }
                    None => break Ok(()),
                },
            }
        };

        session.shutdown().await;
        session_cancel.cancel();
        for worker in workers {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    tracing::error!(call_id = %call_id, error = %e, "Session worker panicked");
                }
            }
        }

        let summary = SessionSummary {
            turns: session.ctx.turns(),
            barge_ins: session.ctx.metrics.barge_in_count,
            duration: started.elapsed(),
        };
        tracing::info!(
            call_id = %call_id,
            turns = summary.turns,
            barge_ins = summary.barge_ins,
            duration_ms = summary.duration.as_millis() as u64,
            "Call session ended"
        );
        outcome.map(|_| summary)
    }
}

/// Fans inbound audio out to recognition and the barge-in monitor.
///
/// Audio is offered without waiting; a full queue drops the frame.
async fn ingest(
    mut inbound: mpsc::Receiver<SessionInput>,
    recognizer: mpsc::Sender<AudioFrame>,
    monitor: mpsc::Sender<AudioFrame>,
    stop: mpsc::Sender<()>,
    cancel: CancellationToken,
) {
    loop {
        let input = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            input = inbound.recv() => input,
        };

        match input {
            Some(SessionInput::Audio(frame)) => {
                if let Err(TrySendError::Full(_)) = monitor.try_send(frame.clone()) {
                    tracing::debug!(sequence = frame.sequence, "Monitor queue full, frame dropped");
                }
                if let Err(TrySendError::Full(frame)) = recognizer.try_send(frame) {
                    tracing::debug!(sequence = frame.sequence, "Recognizer queue full, frame dropped");
                }
            }
            Some(SessionInput::Stop) | None => {
                let _ = stop.send(()).await;
                break;
            }
        }
    }
}

enum JobSource {
    Reply(GenerateRequest),
    Line(String),
}

/// Running state of one call, owned by the session loop
struct Session {
    ctx: ConversationContext,
    config: SessionConfig,
    dialog: Arc<DialogEngine>,
    player: Arc<SpeechPlayer>,
    sink: Arc<dyn AudioSink>,
    turn_sink: Arc<dyn TurnRecordSink>,
    events_tx: mpsc::Sender<TurnEvent>,
    /// Tells the barge-in monitor when agent audio is playing
    speaking_tx: watch::Sender<bool>,
    states: broadcast::Sender<ConversationState>,
    active: Option<ActiveJob>,
    next_job: u64,
    join_timeout: Duration,
    cancel: CancellationToken,
}

impl Session {
    fn set_state(&mut self, to: ConversationState) {
        if self.ctx.transition(to) {
            let _ = self.states.send(to);
            let speaking = to == ConversationState::Speaking;
            self.speaking_tx.send_if_modified(|current| {
                let changed = *current != speaking;
                *current = speaking;
                changed
            });
        }
    }

    async fn greet(&mut self) {
        let Some(greeting) = self
            .config
            .dialog
            .greeting
            .clone()
            .filter(|g| !g.trim().is_empty())
        else {
            return;
        };
        self.start_job(JobKind::Greeting, JobSource::Line(greeting))
            .await;
        self.set_state(ConversationState::Speaking);
    }

    async fn on_transcript(&mut self, event: TranscriptEvent) {
        match self.ctx.state() {
            ConversationState::Listening
            | ConversationState::UserSpeaking
            | ConversationState::Interrupted => {
                let decision = self.ctx.endpointer.on_transcript(&event);
                self.apply_decision(decision).await;
            }
            ConversationState::Thinking => {
                tracing::debug!(text = %event.text, "Transcript while thinking, dropped");
            }
            ConversationState::Speaking => {
                if self.transcript_confirms_barge_in(&event) {
                    tracing::info!(call_id = %self.ctx.call_id, text = %event.text, "Barge-in from transcript");
                    self.barge_in().await;
                    let decision = self.ctx.endpointer.on_transcript(&event);
                    self.apply_decision(decision).await;
                } else {
                    tracing::debug!(text = %event.text, "Transcript while speaking, dropped");
                }
            }
        }
    }

    fn transcript_confirms_barge_in(&self, event: &TranscriptEvent) -> bool {
        let barge_in = &self.config.barge_in;
        match barge_in.transcript_min_chars {
            Some(min) if barge_in.enabled && !event.is_blank() => {
                event.trimmed().chars().count() >= min
            }
            _ => false,
        }
    }

    async fn apply_decision(&mut self, decision: EndpointDecision) {
        match decision {
            EndpointDecision::Pending => {}
            EndpointDecision::Started => {
                self.ctx.metrics.mark_first_interim();
                if self.ctx.state() == ConversationState::Listening {
                    self.set_state(ConversationState::UserSpeaking);
                }
            }
            EndpointDecision::Finalize(text) => self.on_utterance(text).await,
            EndpointDecision::Discarded => {
                if self.ctx.state() == ConversationState::UserSpeaking {
                    self.set_state(ConversationState::Listening);
                }
            }
        }
    }

    async fn on_utterance(&mut self, text: String) {
        if self.ctx.state() == ConversationState::Listening {
            // Final without any interim before it
            self.ctx.metrics.mark_turn_start();
            self.set_state(ConversationState::UserSpeaking);
        }
        if self.ctx.state() != ConversationState::UserSpeaking {
            tracing::debug!(state = %self.ctx.state(), "Utterance outside a user turn, dropped");
            return;
        }

        self.ctx.metrics.mark_final_transcript();
        let turn = self.ctx.begin_user_turn();
        tracing::info!(call_id = %self.ctx.call_id, turn, utterance = %text, "User utterance");

        let request = self.dialog.begin_turn(&mut self.ctx.history, &text);
        self.set_state(ConversationState::Thinking);
        self.start_job(JobKind::Reply, JobSource::Reply(request))
            .await;
    }

    async fn start_job(&mut self, kind: JobKind, source: JobSource) -> JobId {
        if let Some(previous) = self.active.take() {
            tracing::debug!(job = %previous.id, "Cancelling previous job");
            previous.cancel_and_join(self.join_timeout).await;
        }

        self.next_job += 1;
        let id = JobId(self.next_job);
        let cancel = self.cancel.child_token();

        let (generation, chunks, response) = match source {
            JobSource::Reply(request) => {
                let (chunk_tx, chunk_rx) = mpsc::channel(self.dialog.config().chunk_queue.max(1));
                let handle = tokio::spawn(self.dialog.clone().stream_reply(
                    id,
                    request,
                    chunk_tx,
                    self.events_tx.clone(),
                    cancel.clone(),
                ));
                (Some(handle), chunk_rx, None)
            }
            JobSource::Line(text) => (None, single_line(id, &text), Some(text)),
        };
        let playback = tokio::spawn(self.player.clone().play(
            id,
            chunks,
            self.events_tx.clone(),
            cancel.clone(),
        ));

        let mut job = ActiveJob::new(id, kind, cancel, generation, playback);
        job.response = response;
        tracing::debug!(job = %id, kind = kind.as_str(), "Job started");
        self.active = Some(job);
        id
    }

    async fn on_turn_event(&mut self, event: TurnEvent) {
        if self.active.as_ref().map(|job| job.id) != Some(event.job()) {
            tracing::debug!(job = %event.job(), "Event from an abandoned job, ignored");
            return;
        }

        match event {
            TurnEvent::FirstToken(_) => self.ctx.metrics.mark_first_token(),
            TurnEvent::FirstChunk(_) => {
                if self.ctx.state() == ConversationState::Thinking {
                    self.set_state(ConversationState::Speaking);
                }
            }
            TurnEvent::FirstAudio(_) => self.ctx.metrics.mark_first_audio(),
            TurnEvent::GenerationDone { response, .. } => {
                if let Some(job) = self.active.as_mut() {
                    job.response = Some(response);
                }
            }
            TurnEvent::GenerationFailed { error, .. } => self.on_job_failed("generation", error).await,
            TurnEvent::PlaybackFailed { error, .. } => self.on_job_failed("synthesis", error).await,
            TurnEvent::PlaybackDone(_) => self.on_job_done().await,
        }
    }

    async fn on_job_done(&mut self) {
        let Some(job) = self.active.take() else {
            return;
        };
        // Cancellation wins over a completion report already in flight
        if job.is_cancelled() {
            return;
        }

        let kind = job.kind;
        let response = job.response.clone().unwrap_or_default();
        job.join(self.join_timeout).await;

        match kind {
            JobKind::Reply => {
                if self.dialog.commit(&mut self.ctx.history, &response) {
                    self.emit_record(TurnOutcome::Completed);
                } else {
                    tracing::warn!(call_id = %self.ctx.call_id, "Reply was empty, nothing spoken");
                    self.emit_record(TurnOutcome::Failed);
                }
            }
            JobKind::Greeting => {
                self.dialog.commit(&mut self.ctx.history, &response);
            }
            JobKind::Fallback => {}
        }
        self.set_state(ConversationState::Listening);
    }

    async fn on_job_failed(&mut self, stage: &'static str, error: Error) {
        let Some(job) = self.active.take() else {
            return;
        };
        let kind = job.kind;
        let class = error.kind();
        tracing::warn!(
            call_id = %self.ctx.call_id,
            job = %job.id,
            stage,
            kind = class.as_str(),
            error = %error,
            "Turn failed"
        );
        metrics::counter!(metric_names::ERRORS, "stage" => stage, "kind" => class.as_str())
            .increment(1);

        job.cancel_and_join(self.join_timeout).await;
        if self.ctx.state() == ConversationState::Speaking {
            self.clear_sink().await;
        }

        let fallback = self.config.dialog.fallback_line.trim().to_string();
        match kind {
            JobKind::Reply if class == ErrorKind::Connection && !fallback.is_empty() => {
                self.emit_record(TurnOutcome::Fallback);
                self.start_job(JobKind::Fallback, JobSource::Line(fallback))
                    .await;
                if self.ctx.state() == ConversationState::Thinking {
                    self.set_state(ConversationState::Speaking);
                }
            }
            JobKind::Reply => {
                self.emit_record(TurnOutcome::Failed);
                self.set_state(ConversationState::Listening);
            }
            JobKind::Greeting | JobKind::Fallback => {
                self.set_state(ConversationState::Listening);
            }
        }
    }

    async fn on_audio_barge_in(&mut self, signal: BargeInSignal) {
        if !self.config.barge_in.enabled {
            tracing::debug!(confidence = signal.confidence, "Barge-in disabled, user speech ignored");
            return;
        }
        tracing::info!(
            call_id = %self.ctx.call_id,
            confidence = signal.confidence,
            frames = signal.frames,
            "Barge-in from audio"
        );
        self.barge_in().await;
    }

    /// Stop the agent and hand the floor to the user.
    ///
    /// Returns once both job workers have stopped and the transport was
    /// told to drop buffered audio.
    async fn barge_in(&mut self) {
        if self.ctx.state() != ConversationState::Speaking {
            tracing::debug!(state = %self.ctx.state(), "Barge-in outside speaking ignored");
            return;
        }

        self.set_state(ConversationState::Interrupted);
        let kind = match self.active.take() {
            Some(job) => {
                let kind = job.kind;
                job.cancel_and_join(self.join_timeout).await;
                Some(kind)
            }
            None => None,
        };
        self.clear_sink().await;

        self.ctx.metrics.record_barge_in();
        metrics::counter!(metric_names::BARGE_INS).increment(1);
        if kind == Some(JobKind::Reply) {
            self.emit_record(TurnOutcome::Interrupted);
        }

        // The interruption starts the next user turn
        self.ctx.metrics.reset_turn();
        self.ctx.metrics.mark_turn_start();
        self.ctx.endpointer.reset();
        self.set_state(ConversationState::UserSpeaking);
    }

    async fn clear_sink(&self) {
        if let Err(e) = self.sink.clear().await {
            tracing::warn!(call_id = %self.ctx.call_id, error = %e, "Failed to clear outbound audio");
        }
    }

    fn emit_record(&mut self, outcome: TurnOutcome) {
        let record = self.ctx.finish_turn(outcome);
        self.turn_sink.record(&record);
    }

    async fn shutdown(&mut self) {
        self.ctx.endpointer.cancel_timers();
        if let Some(job) = self.active.take() {
            job.cancel_and_join(self.join_timeout).await;
        }
        self.speaking_tx.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxcall_core::AudioEncoding;

    #[test]
    fn test_session_config_from_settings() {
        let mut settings = Settings::default();
        settings.recognizer.encoding = AudioEncoding::Pcm16;
        settings.recognizer.sample_rate = 16000;
        settings.endpointer.silence_ms = 250;

        let config = SessionConfig::from_settings(&settings).unwrap();
        assert_eq!(config.recognition.format.sample_rate, SampleRate::Hz16000);
        assert_eq!(config.recognition.format.encoding, AudioEncoding::Pcm16);
        assert!(config.recognition.interim_results);
        assert_eq!(config.endpointer.silence_ms, 250);
    }

    #[test]
    fn test_session_config_rejects_odd_rate() {
        let mut settings = Settings::default();
        settings.recognizer.sample_rate = 44100;
        assert!(SessionConfig::from_settings(&settings).is_err());
    }
}

//! Semantic endpointer
//!
//! Decides when the user has finished an utterance. Three triggers race:
//!
//! - the recognizer's own finality (`is_final` with text, or utterance end)
//! - a silence timer restarted by every interim transcript
//! - a shorter semantic timer armed when the text already looks complete
//!
//! Timers are spawned tasks that report back over a channel. Every new
//! interim bumps a generation counter and aborts the running timers, so a
//! firing that raced the abort is recognised as stale and ignored.

mod policy;

pub use policy::{CompletionPolicy, PhrasePolicy};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voxcall_config::EndpointerConfig;
use voxcall_core::TranscriptEvent;

/// Which timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Silence,
    Semantic,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::Silence => "silence",
            TimerKind::Semantic => "semantic",
        }
    }
}

/// Message sent by an expired timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub generation: u64,
    pub kind: TimerKind,
    /// Transcript the timer was armed against
    pub snapshot: String,
}

/// What the caller should do after feeding an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointDecision {
    /// Nothing to act on
    Pending,
    /// First text of a new utterance
    Started,
    /// Utterance complete; forward the text
    Finalize(String),
    /// Utterance ended but is too short to forward
    Discarded,
}

/// Trigger that finalized an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    RecognizerFinal,
    UtteranceEnd,
    EmptyFinal,
    Timer(TimerKind),
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::RecognizerFinal => "final",
            Trigger::UtteranceEnd => "utterance_end",
            Trigger::EmptyFinal => "empty_final",
            Trigger::Timer(kind) => kind.as_str(),
        }
    }
}

/// Per-call end-of-utterance detector
pub struct Endpointer {
    config: EndpointerConfig,
    policy: Arc<dyn CompletionPolicy>,
    timer_tx: mpsc::Sender<TimerFired>,
    timers: Vec<JoinHandle<()>>,
    generation: u64,
    /// Utterance text in progress
    current: String,
    last_stable: String,
    stability_count: u32,
    /// Interim text seen since the last finalize
    active: bool,
    /// Comparison key of the last forwarded utterance
    last_forwarded: Option<String>,
}

impl Endpointer {
    pub fn new(
        config: EndpointerConfig,
        policy: Arc<dyn CompletionPolicy>,
        timer_tx: mpsc::Sender<TimerFired>,
    ) -> Self {
        Self {
            config,
            policy,
            timer_tx,
            timers: Vec::new(),
            generation: 0,
            current: String::new(),
            last_stable: String::new(),
            stability_count: 0,
            active: false,
            last_forwarded: None,
        }
    }

    /// Feed one recognizer event
    pub fn on_transcript(&mut self, event: &TranscriptEvent) -> EndpointDecision {
        let text = event.trimmed();

        if event.is_final && !text.is_empty() {
            self.current = text.to_string();
            return self.finalize(Trigger::RecognizerFinal);
        }

        if event.is_endpoint {
            if !text.is_empty() {
                self.current = text.to_string();
            }
            if self.active {
                return self.finalize(Trigger::UtteranceEnd);
            }
            return EndpointDecision::Pending;
        }

        if event.is_final {
            // Empty final: only a complete-looking utterance ends here
            if self.active && self.policy.looks_complete(&self.current) {
                return self.finalize(Trigger::EmptyFinal);
            }
            return EndpointDecision::Pending;
        }

        if text.is_empty() {
            return EndpointDecision::Pending;
        }

        self.on_interim(text)
    }

    fn on_interim(&mut self, text: &str) -> EndpointDecision {
        let started = !self.active;
        self.active = true;

        if text == self.last_stable {
            self.stability_count += 1;
        } else {
            self.stability_count = 0;
            self.last_stable = text.to_string();
        }
        self.current = text.to_string();
        tracing::debug!(
            transcript = %text,
            stable = self.stability_count,
            "Interim transcript"
        );

        self.cancel_timers();
        self.arm(TimerKind::Silence, self.config.effective_silence_ms());
        if self.policy.looks_complete(text) {
            self.arm(TimerKind::Semantic, self.config.effective_semantic_ms());
        }

        if started {
            EndpointDecision::Started
        } else {
            EndpointDecision::Pending
        }
    }

    /// Handle an expired timer
    pub fn on_timer(&mut self, fired: TimerFired) -> EndpointDecision {
        if fired.generation != self.generation || !self.active {
            tracing::trace!(kind = fired.kind.as_str(), "Stale endpoint timer");
            return EndpointDecision::Pending;
        }
        if fired.kind == TimerKind::Semantic && fired.snapshot != self.current {
            return EndpointDecision::Pending;
        }
        self.finalize(Trigger::Timer(fired.kind))
    }

    fn finalize(&mut self, trigger: Trigger) -> EndpointDecision {
        self.cancel_timers();
        let text = std::mem::take(&mut self.current).trim().to_string();
        let was_active = self.active;
        self.active = false;
        self.last_stable.clear();
        self.stability_count = 0;

        if text.is_empty() {
            return EndpointDecision::Pending;
        }

        // A recognizer final repeating what a timer already forwarded
        let key = comparison_key(&text);
        if !was_active && self.last_forwarded.as_deref() == Some(key.as_str()) {
            tracing::debug!(transcript = %text, "Duplicate final ignored");
            return EndpointDecision::Pending;
        }

        if text.chars().count() < self.config.min_utterance_chars {
            tracing::debug!(transcript = %text, "Utterance too short, discarded");
            return EndpointDecision::Discarded;
        }

        tracing::info!(transcript = %text, trigger = trigger.as_str(), "Utterance finalized");
        self.last_forwarded = Some(key);
        EndpointDecision::Finalize(text)
    }

    fn arm(&mut self, kind: TimerKind, delay_ms: u64) {
        let fired = TimerFired {
            generation: self.generation,
            kind,
            snapshot: self.current.clone(),
        };
        let tx = self.timer_tx.clone();
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let _ = tx.send(fired).await;
        }));
    }

    /// Abort running timers and invalidate any in-flight firing
    pub fn cancel_timers(&mut self) {
        self.generation += 1;
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    /// Forget the utterance in progress (keeps duplicate protection)
    pub fn reset(&mut self) {
        self.cancel_timers();
        self.current.clear();
        self.last_stable.clear();
        self.stability_count = 0;
        self.active = false;
    }

    /// Text of the utterance in progress
    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn stability_count(&self) -> u32 {
        self.stability_count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for Endpointer {
    fn drop(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

/// Lowercased words without punctuation, single spaced
fn comparison_key(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || *c == '\'')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

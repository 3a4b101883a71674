//! Voice Activity Detection
//!
//! A pluggable per-frame scorer produces a raw speech probability. The
//! detector adjusts it against a rolling context window, smooths it
//! exponentially and runs a hysteresis state machine:
//!
//! ```text
//! Silence -> PossibleSpeech -> Speech -> PossibleSilence -> Silence
//! ```
//!
//! A frame counts as speech in `PossibleSpeech` and `Speech`.

mod energy;
#[cfg(feature = "silero")]
mod silero;

pub use energy::EnergyScorer;
#[cfg(feature = "silero")]
pub use silero::SileroScorer;

use std::collections::VecDeque;
use voxcall_config::{VadConfig, VadModel};
use voxcall_core::{AudioFrame, SampleRate};

/// Raw per-frame speech probability
pub trait SpeechScorer: Send + 'static {
    /// Probability in [0, 1] that `samples` contain speech
    fn score(&mut self, samples: &[f32]) -> f32;

    fn name(&self) -> &str;
}

/// VAD state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadState {
    /// No speech detected
    #[default]
    Silence,
    /// Above the speech threshold, not yet long enough
    PossibleSpeech,
    /// Active speech confirmed
    Speech,
    /// Below the silence threshold, not yet long enough
    PossibleSilence,
}

impl VadState {
    pub fn is_speech(&self) -> bool {
        matches!(self, VadState::PossibleSpeech | VadState::Speech)
    }
}

/// Result for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadResult {
    pub state: VadState,
    pub speech_detected: bool,
    /// Smoothed, context-adjusted probability
    pub confidence: f32,
    /// Scorer output before adjustment
    pub raw_probability: f32,
}

/// Frames in the short "recent" slice of the context window
const RECENT_FRAMES: usize = 10;

/// Stateful detector, one per call
pub struct VoiceActivityDetector {
    scorer: Box<dyn SpeechScorer>,
    speech_threshold: f32,
    silence_threshold: f32,
    smoothing: f32,
    min_speech_ms: u32,
    min_silence_ms: u32,
    context: VecDeque<f32>,
    context_frames: usize,
    smoothed: f32,
    state: VadState,
    /// Time spent in the current tentative state
    pending_ms: u32,
}

impl VoiceActivityDetector {
    pub fn new(config: &VadConfig, scorer: Box<dyn SpeechScorer>) -> Self {
        let (speech_threshold, silence_threshold) = config.thresholds();
        Self {
            scorer,
            speech_threshold,
            silence_threshold,
            smoothing: config.smoothing,
            min_speech_ms: config.min_speech_ms,
            min_silence_ms: config.min_silence_ms,
            context: VecDeque::with_capacity(config.context_frames),
            context_frames: config.context_frames.max(1),
            smoothed: 0.0,
            state: VadState::Silence,
            pending_ms: 0,
        }
    }

    /// Detector backed by the energy scorer
    pub fn energy(config: &VadConfig) -> Self {
        let scorer = EnergyScorer::new(config.energy_floor_db, config.energy_ceiling_db);
        Self::new(config, Box::new(scorer))
    }

    /// Detector backed by the configured model.
    ///
    /// Falls back to the energy scorer when the model cannot run at
    /// `sample_rate` or fails to load.
    pub fn from_config(config: &VadConfig, sample_rate: SampleRate) -> Self {
        let detector = match config.model {
            VadModel::Energy => Self::energy(config),
            VadModel::Silero => Self::silero(config, sample_rate),
        };
        tracing::debug!(scorer = detector.scorer_name(), "VAD ready");
        detector
    }

    #[cfg(feature = "silero")]
    fn silero(config: &VadConfig, sample_rate: SampleRate) -> Self {
        match SileroScorer::new(sample_rate) {
            Ok(scorer) => Self::new(config, Box::new(scorer)),
            Err(e) => {
                tracing::warn!(error = %e, "Silero VAD unavailable, using energy VAD");
                Self::energy(config)
            }
        }
    }

    #[cfg(not(feature = "silero"))]
    fn silero(config: &VadConfig, _sample_rate: SampleRate) -> Self {
        tracing::warn!("Built without Silero VAD, using energy VAD");
        Self::energy(config)
    }

    /// Process one audio frame
    pub fn process_frame(&mut self, frame: &AudioFrame) -> VadResult {
        self.process_samples(&frame.to_samples(), frame.duration_ms() as u32)
    }

    /// Process decoded samples lasting `frame_ms`
    pub fn process_samples(&mut self, samples: &[f32], frame_ms: u32) -> VadResult {
        let raw = self.scorer.score(samples);
        self.process_probability(raw, frame_ms)
    }

    /// Feed an externally computed probability
    pub fn process_probability(&mut self, raw: f32, frame_ms: u32) -> VadResult {
        let adjusted = self.contextualize(raw.clamp(0.0, 1.0));
        self.smoothed = self.smoothing * self.smoothed + (1.0 - self.smoothing) * adjusted;
        self.update_state(self.smoothed, frame_ms);

        VadResult {
            state: self.state,
            speech_detected: self.state.is_speech(),
            confidence: self.smoothed,
            raw_probability: raw,
        }
    }

    fn contextualize(&mut self, probability: f32) -> f32 {
        if self.context.len() == self.context_frames {
            self.context.pop_front();
        }
        self.context.push_back(probability);

        if self.context.len() <= RECENT_FRAMES {
            return probability;
        }

        let recent = mean(self.context.iter().rev().take(RECENT_FRAMES));
        let overall = mean(self.context.iter());

        let mut p = probability;
        if recent > 0.3 && p > 0.4 {
            p = (p * 1.2).min(1.0);
        }
        if overall < 0.1 && p < 0.6 {
            p *= 0.7;
        }
        p
    }

    fn update_state(&mut self, p: f32, frame_ms: u32) {
        let previous = self.state;
        self.state = match self.state {
            VadState::Silence if p > self.speech_threshold => {
                self.pending_ms = frame_ms;
                self.confirm_speech()
            }
            VadState::Silence => VadState::Silence,
            VadState::PossibleSpeech if p > self.speech_threshold => {
                self.pending_ms += frame_ms;
                self.confirm_speech()
            }
            VadState::PossibleSpeech => VadState::Silence,
            VadState::Speech if p < self.silence_threshold => {
                self.pending_ms = frame_ms;
                self.confirm_silence()
            }
            VadState::Speech => VadState::Speech,
            VadState::PossibleSilence if p < self.silence_threshold => {
                self.pending_ms += frame_ms;
                self.confirm_silence()
            }
            VadState::PossibleSilence => VadState::Speech,
        };

        if previous != self.state {
            tracing::trace!(from = ?previous, to = ?self.state, confidence = p, "VAD state");
        }
    }

    fn confirm_speech(&self) -> VadState {
        if self.pending_ms >= self.min_speech_ms {
            VadState::Speech
        } else {
            VadState::PossibleSpeech
        }
    }

    fn confirm_silence(&self) -> VadState {
        if self.pending_ms >= self.min_silence_ms {
            VadState::Silence
        } else {
            VadState::PossibleSilence
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    pub fn reset(&mut self) {
        self.context.clear();
        self.smoothed = 0.0;
        self.state = VadState::Silence;
        self.pending_ms = 0;
    }
}

fn mean<'a>(values: impl Iterator<Item = &'a f32>) -> f32 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

//! Per-call pipeline configuration
//!
//! One struct per stage of the call: endpointing, dialog, synthesis
//! playback, barge-in, echo cancellation and VAD.

use crate::constants::{audio, barge_in, dialog, echo, endpointing, synthesis, vad};
use serde::{Deserialize, Serialize};

/// Semantic endpointer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointerConfig {
    /// Silence after the last interim text that finalizes an utterance
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,

    /// Delay used when the text already looks complete (capped at `silence_ms`)
    #[serde(default = "default_semantic_ms")]
    pub semantic_ms: u64,

    /// Added to the silence timer only
    #[serde(default)]
    pub silence_grace_ms: u64,

    /// Shorter utterances are dropped
    #[serde(default = "default_min_utterance_chars")]
    pub min_utterance_chars: usize,

    /// Short replies that are complete on their own (lowercase)
    #[serde(default = "default_complete_phrases")]
    pub complete_phrases: Vec<String>,

    /// Words that start a question (lowercase)
    #[serde(default = "default_question_starters")]
    pub question_starters: Vec<String>,

    /// Minimum words for a question to count as complete
    #[serde(default = "default_min_question_words")]
    pub min_question_words: usize,
}

fn default_silence_ms() -> u64 {
    endpointing::SILENCE_MS
}
fn default_semantic_ms() -> u64 {
    endpointing::SEMANTIC_MS
}
fn default_min_utterance_chars() -> usize {
    endpointing::MIN_UTTERANCE_CHARS
}
fn default_complete_phrases() -> Vec<String> {
    endpointing::COMPLETE_PHRASES
        .iter()
        .map(|p| p.to_string())
        .collect()
}
fn default_question_starters() -> Vec<String> {
    endpointing::QUESTION_STARTERS
        .iter()
        .map(|p| p.to_string())
        .collect()
}
fn default_min_question_words() -> usize {
    endpointing::MIN_QUESTION_WORDS
}

impl Default for EndpointerConfig {
    fn default() -> Self {
        Self {
            silence_ms: default_silence_ms(),
            semantic_ms: default_semantic_ms(),
            silence_grace_ms: 0,
            min_utterance_chars: default_min_utterance_chars(),
            complete_phrases: default_complete_phrases(),
            question_starters: default_question_starters(),
            min_question_words: default_min_question_words(),
        }
    }
}

impl EndpointerConfig {
    /// Semantic delay, never longer than the silence threshold
    pub fn effective_semantic_ms(&self) -> u64 {
        self.semantic_ms.min(self.silence_ms)
    }

    /// Silence timer including grace
    pub fn effective_silence_ms(&self) -> u64 {
        self.silence_ms + self.silence_grace_ms
    }
}

/// Dialog engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogConfig {
    /// Leading system entry of every history
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Spoken once when the call starts
    #[serde(default)]
    pub greeting: Option<String>,

    /// Messages kept in history, system entry included
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Spoken when a turn cannot be answered
    #[serde(default = "default_fallback_line")]
    pub fallback_line: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Buffered chunks between generation and synthesis
    #[serde(default = "default_chunk_queue")]
    pub chunk_queue: usize,
}

fn default_system_prompt() -> String {
    "You are a friendly phone assistant. Keep every reply short and conversational, \
     one or two sentences, with no lists or markdown."
        .to_string()
}
fn default_history_limit() -> usize {
    dialog::HISTORY_LIMIT
}
fn default_fallback_line() -> String {
    dialog::FALLBACK_LINE.to_string()
}
fn default_max_tokens() -> u32 {
    dialog::MAX_TOKENS
}
fn default_temperature() -> f32 {
    dialog::TEMPERATURE
}
fn default_chunk_queue() -> usize {
    dialog::CHUNK_QUEUE
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            greeting: None,
            history_limit: default_history_limit(),
            fallback_line: default_fallback_line(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            chunk_queue: default_chunk_queue(),
        }
    }
}

/// Playback pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Outbound frame duration
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    /// Pause between chunks of one response
    #[serde(default = "default_chunk_pause_ms")]
    pub chunk_pause_ms: u64,

    /// Frames sent ahead of real time
    #[serde(default = "default_prebuffer_frames")]
    pub prebuffer_frames: u32,
}

fn default_frame_ms() -> u32 {
    audio::FRAME_MS
}
fn default_chunk_pause_ms() -> u64 {
    synthesis::CHUNK_PAUSE_MS
}
fn default_prebuffer_frames() -> u32 {
    synthesis::PREBUFFER_FRAMES
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            frame_ms: default_frame_ms(),
            chunk_pause_ms: default_chunk_pause_ms(),
            prebuffer_frames: default_prebuffer_frames(),
        }
    }
}

/// Barge-in confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargeInConfig {
    /// When false, speech during playback is only logged
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// VAD confidence a frame must exceed
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Consecutive confident frames needed
    #[serde(default = "default_consecutive_frames")]
    pub consecutive_frames: u32,

    /// Interim transcript length that also confirms a barge-in
    #[serde(default)]
    pub transcript_min_chars: Option<usize>,
}

fn default_true() -> bool {
    true
}
fn default_confidence_threshold() -> f32 {
    barge_in::CONFIDENCE
}
fn default_consecutive_frames() -> u32 {
    barge_in::CONSECUTIVE_FRAMES
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: default_confidence_threshold(),
            consecutive_frames: default_consecutive_frames(),
            transcript_min_chars: None,
        }
    }
}

/// NLMS echo canceller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter length in samples
    #[serde(default = "default_taps")]
    pub taps: usize,

    /// Normalized step size (0, 2)
    #[serde(default = "default_step_size")]
    pub step_size: f32,

    /// Regularization
    #[serde(default = "default_delta")]
    pub delta: f32,

    /// Input/reference power ratio treated as double-talk
    #[serde(default = "default_double_talk_ratio")]
    pub double_talk_ratio: f32,

    #[serde(default = "default_hangover_frames")]
    pub hangover_frames: u32,

    /// Outbound frames kept as reference
    #[serde(default = "default_reference_frames")]
    pub reference_frames: usize,
}

fn default_taps() -> usize {
    echo::TAPS
}
fn default_step_size() -> f32 {
    echo::STEP_SIZE
}
fn default_delta() -> f32 {
    echo::DELTA
}
fn default_double_talk_ratio() -> f32 {
    echo::DOUBLE_TALK_RATIO
}
fn default_hangover_frames() -> u32 {
    echo::HANGOVER_FRAMES
}
fn default_reference_frames() -> usize {
    echo::REFERENCE_FRAMES
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            taps: default_taps(),
            step_size: default_step_size(),
            delta: default_delta(),
            double_talk_ratio: default_double_talk_ratio(),
            hangover_frames: default_hangover_frames(),
            reference_frames: default_reference_frames(),
        }
    }
}

/// Per-frame speech scorer behind the VAD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadModel {
    /// Silero neural model
    #[default]
    Silero,
    /// Frame energy between `energy_floor_db` and `energy_ceiling_db`
    Energy,
}

/// Voice activity detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default)]
    pub model: VadModel,

    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f32,

    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,

    /// Use the lower noisy-line thresholds
    #[serde(default)]
    pub aggressive: bool,

    /// Weight of the previous smoothed probability
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,

    /// Rolling context window, in frames
    #[serde(default = "default_context_frames")]
    pub context_frames: usize,

    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u32,

    #[serde(default = "default_min_silence_ms")]
    pub min_silence_ms: u32,

    /// Energy mapped to probability 0.0
    #[serde(default = "default_energy_floor_db")]
    pub energy_floor_db: f32,

    /// Energy mapped to probability 1.0
    #[serde(default = "default_energy_ceiling_db")]
    pub energy_ceiling_db: f32,
}

fn default_speech_threshold() -> f32 {
    vad::SPEECH_THRESHOLD
}
fn default_silence_threshold() -> f32 {
    vad::SILENCE_THRESHOLD
}
fn default_smoothing() -> f32 {
    vad::SMOOTHING
}
fn default_context_frames() -> usize {
    vad::CONTEXT_FRAMES
}
fn default_min_speech_ms() -> u32 {
    vad::MIN_SPEECH_MS
}
fn default_min_silence_ms() -> u32 {
    vad::MIN_SILENCE_MS
}
fn default_energy_floor_db() -> f32 {
    vad::ENERGY_FLOOR_DB
}
fn default_energy_ceiling_db() -> f32 {
    vad::ENERGY_CEILING_DB
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            model: VadModel::default(),
            speech_threshold: default_speech_threshold(),
            silence_threshold: default_silence_threshold(),
            aggressive: false,
            smoothing: default_smoothing(),
            context_frames: default_context_frames(),
            min_speech_ms: default_min_speech_ms(),
            min_silence_ms: default_min_silence_ms(),
            energy_floor_db: default_energy_floor_db(),
            energy_ceiling_db: default_energy_ceiling_db(),
        }
    }
}

impl VadConfig {
    /// (speech, silence) thresholds in effect
    pub fn thresholds(&self) -> (f32, f32) {
        if self.aggressive {
            (
                vad::AGGRESSIVE_SPEECH_THRESHOLD,
                vad::AGGRESSIVE_SILENCE_THRESHOLD,
            )
        } else {
            (self.speech_threshold, self.silence_threshold)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpointer_effective_delays() {
        let mut config = EndpointerConfig::default();
        assert_eq!(config.effective_silence_ms(), 180);
        assert_eq!(config.effective_semantic_ms(), 150);

        config.silence_ms = 100;
        config.silence_grace_ms = endpointing::SILENCE_GRACE_MS;
        assert_eq!(config.effective_semantic_ms(), 100);
        assert_eq!(config.effective_silence_ms(), 150);
    }

    #[test]
    fn test_vad_thresholds() {
        let mut config = VadConfig::default();
        assert_eq!(config.thresholds(), (0.5, 0.35));
        config.aggressive = true;
        assert_eq!(config.thresholds(), (0.3, 0.2));
    }

    #[test]
    fn test_vad_model_names() {
        let config: VadConfig = serde_json::from_str(r#"{"model": "energy"}"#).unwrap();
        assert_eq!(config.model, VadModel::Energy);
        assert_eq!(VadConfig::default().model, VadModel::Silero);
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: BargeInConfig =
            serde_json::from_str(r#"{"consecutive_frames": 5}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.consecutive_frames, 5);
        assert_eq!(config.confidence_threshold, 0.6);
        assert!(config.transcript_min_chars.is_none());
    }
}

//! External service settings: recognizer, generator, synthesizer, retry

use crate::constants::{audio, endpoints, models, retry, timeouts};
use serde::{Deserialize, Serialize};
use voxcall_core::AudioEncoding;

/// Streaming speech recognition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    #[serde(default = "default_listen_url")]
    pub url: String,

    #[serde(default = "default_deepgram_key")]
    pub api_key: String,

    #[serde(default = "default_recognizer_model")]
    pub model: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub encoding: AudioEncoding,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Service-side endpointing silence
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u32,

    /// Service-side utterance-end window
    #[serde(default = "default_utterance_end_ms")]
    pub utterance_end_ms: Option<u32>,

    #[serde(default = "default_true")]
    pub smart_format: bool,
}

fn default_listen_url() -> String {
    endpoints::DEEPGRAM_LISTEN_URL.to_string()
}
fn default_deepgram_key() -> String {
    std::env::var("DEEPGRAM_API_KEY").unwrap_or_default()
}
fn default_recognizer_model() -> String {
    models::RECOGNIZER.to_string()
}
fn default_language() -> String {
    "en-US".to_string()
}
fn default_sample_rate() -> u32 {
    audio::SAMPLE_RATE_HZ
}
fn default_endpointing_ms() -> u32 {
    crate::constants::endpointing::SILENCE_MS as u32
}
fn default_utterance_end_ms() -> Option<u32> {
    Some(1000)
}
fn default_true() -> bool {
    true
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            url: default_listen_url(),
            api_key: default_deepgram_key(),
            model: default_recognizer_model(),
            language: default_language(),
            encoding: AudioEncoding::Mulaw,
            sample_rate: default_sample_rate(),
            endpointing_ms: default_endpointing_ms(),
            utterance_end_ms: default_utterance_end_ms(),
            smart_format: true,
        }
    }
}

/// OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Base URL up to and including `/v1`
    #[serde(default = "default_generator_url")]
    pub base_url: String,

    #[serde(default = "default_groq_key")]
    pub api_key: String,

    #[serde(default = "default_generator_model")]
    pub model: String,

    /// Whole-request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_generator_url() -> String {
    endpoints::GROQ_BASE_URL.to_string()
}
fn default_groq_key() -> String {
    std::env::var("GROQ_API_KEY").unwrap_or_default()
}
fn default_generator_model() -> String {
    models::GENERATOR.to_string()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_generator_url(),
            api_key: default_groq_key(),
            model: default_generator_model(),
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Streaming speech synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    #[serde(default = "default_speak_url")]
    pub url: String,

    #[serde(default = "default_deepgram_key")]
    pub api_key: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default)]
    pub encoding: AudioEncoding,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_speak_url() -> String {
    endpoints::DEEPGRAM_SPEAK_URL.to_string()
}
fn default_voice() -> String {
    models::SYNTHESIZER_VOICE.to_string()
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            url: default_speak_url(),
            api_key: default_deepgram_key(),
            voice: default_voice(),
            encoding: AudioEncoding::Mulaw,
            sample_rate: default_sample_rate(),
        }
    }
}

/// Connection retry and cancellation timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts after a failed connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, doubled on each further one
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Deadline for opening any service stream
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Wait for cancelled workers before aborting them
    #[serde(default = "default_cancel_join_ms")]
    pub cancel_join_ms: u64,
}

fn default_max_retries() -> u32 {
    retry::MAX_RETRIES
}
fn default_backoff_ms() -> u64 {
    retry::BACKOFF_MS
}
fn default_connect_timeout_ms() -> u64 {
    timeouts::CONNECT_MS
}
fn default_cancel_join_ms() -> u64 {
    timeouts::CANCEL_JOIN_MS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            cancel_join_ms: default_cancel_join_ms(),
        }
    }
}

//! Core traits and types for the voice call orchestrator
//!
//! This crate provides foundational types used across all other crates:
//! - Audio frames and the G.711 µ-law codec
//! - Conversation state and bounded dialog history
//! - Transcript, speech chunk and LLM message types
//! - Per-turn metrics and turn records
//! - Service traits for recognizer, generator, synthesizer and transport
//! - Error types

pub mod audio;
pub mod conversation;
pub mod error;
pub mod llm_types;
pub mod metrics;
pub mod speech;
pub mod traits;
pub mod transcript;

pub use audio::{AudioEncoding, AudioFormat, AudioFrame, SampleRate};
pub use conversation::{ConversationState, DialogHistory};
pub use error::{Error, ErrorKind, Result, Service};
pub use llm_types::{FinishReason, GenerateRequest, Message, Role, StreamChunk};
pub use metrics::{ConversationMetrics, MetricsSnapshot, TurnOutcome, TurnRecord, TurnSummary};
pub use speech::SpeechChunk;
pub use transcript::TranscriptEvent;

pub use traits::{
    AudioByteStream, AudioSink, GenerateStream, NoopTurnSink, RecognitionConfig,
    RecognitionSession, RecognizeStream, SynthesizeStream, TokenStream, TurnRecordSink,
};

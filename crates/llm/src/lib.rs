//! Language model integration
//!
//! Features:
//! - OpenAI-compatible chat completions (Groq, OpenAI, vLLM, local servers)
//! - Server-sent event streaming with mid-stream cancellation
//! - Connection vs mid-stream error classification for the call session

pub mod backend;
pub mod sse;

pub use backend::OpenAiBackend;
pub use sse::{SseBuffer, SseEvent};

use thiserror::Error;
use voxcall_core::Service;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    /// Request never produced a stream
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Stream broke after the first byte
    #[error("Stream interrupted: {0}")]
    Interrupted(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

impl From<LlmError> for voxcall_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Network(_) | LlmError::Api { .. } => {
                voxcall_core::Error::connect(Service::Generator, err.to_string())
            }
            LlmError::Interrupted(_) => {
                voxcall_core::Error::stream(Service::Generator, err.to_string())
            }
            LlmError::InvalidResponse(_) => {
                voxcall_core::Error::malformed(Service::Generator, err.to_string())
            }
            LlmError::Configuration(message) => voxcall_core::Error::Config(message),
        }
    }
}

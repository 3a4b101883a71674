//! Real-time call pipeline
//!
//! This crate provides the per-call machinery between the audio transport
//! and the three speech/language services:
//! - Semantic endpointing (recognizer finality, silence and completion timers)
//! - Streaming dialog with sentence chunking
//! - Paced speech synthesis and playback
//! - NLMS echo cancellation, VAD and barge-in detection
//! - Recognition stream ownership with reconnect
//! - The call session state machine tying it together
//! - Deepgram recognizer and synthesizer adapters

pub mod barge_in;
pub mod context;
pub mod dialog;
pub mod echo;
pub mod endpointer;
pub mod orchestrator;
pub mod recognition;
pub mod retry;
pub mod stt;
pub mod synthesis;
pub mod tts;
pub mod turn;
pub mod vad;

pub use barge_in::{BargeInDetector, BargeInMonitor, BargeInSignal};
pub use context::ConversationContext;
pub use dialog::{DialogEngine, SentenceChunker};
pub use echo::{EchoCanceller, ReferenceRing};
pub use endpointer::{CompletionPolicy, EndpointDecision, Endpointer, PhrasePolicy, TimerFired};
pub use orchestrator::{CallServices, CallSession, SessionConfig, SessionInput, SessionSummary};
pub use recognition::RecognitionAdapter;
pub use retry::RetryPolicy;
pub use stt::DeepgramRecognizer;
pub use synthesis::{FrameAssembler, PlaybackPacer, SpeechPlayer};
pub use tts::DeepgramSynthesizer;
pub use turn::{ActiveJob, JobId, JobKind, TurnEvent};
pub use vad::{EnergyScorer, SpeechScorer, VadResult, VadState, VoiceActivityDetector};
#[cfg(feature = "silero")]
pub use vad::SileroScorer;

use thiserror::Error;
use voxcall_core::Service;

/// Metric names recorded by the pipeline
pub mod metric_names {
    pub const BARGE_INS: &str = "voxcall_barge_ins_total";
    pub const ERRORS: &str = "voxcall_errors_total";
}

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("STT connection error: {0}")]
    SttConnect(String),

    #[error("STT stream error: {0}")]
    SttStream(String),

    #[error("TTS connection error: {0}")]
    TtsConnect(String),

    #[error("TTS stream error: {0}")]
    TtsStream(String),

    #[error("Unexpected {service} payload: {message}")]
    Malformed { service: Service, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<PipelineError> for voxcall_core::Error {
    fn from(err: PipelineError) -> Self {
        use voxcall_core::Error;

        match err {
            PipelineError::SttConnect(msg) => Error::connect(Service::Recognizer, msg),
            PipelineError::SttStream(msg) => Error::stream(Service::Recognizer, msg),
            PipelineError::TtsConnect(msg) => Error::connect(Service::Synthesizer, msg),
            PipelineError::TtsStream(msg) => Error::stream(Service::Synthesizer, msg),
            PipelineError::Malformed { service, message } => Error::malformed(service, message),
            PipelineError::Config(msg) => Error::Config(msg),
            PipelineError::ChannelClosed => Error::ChannelClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxcall_core::ErrorKind;

    #[test]
    fn test_error_mapping_keeps_class() {
        let err: voxcall_core::Error = PipelineError::SttConnect("refused".into()).into();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(err.service(), Some(Service::Recognizer));

        let err: voxcall_core::Error = PipelineError::TtsStream("reset".into()).into();
        assert_eq!(err.kind(), ErrorKind::MidStream);

        let err: voxcall_core::Error = PipelineError::Malformed {
            service: Service::Recognizer,
            message: "not json".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }
}

//! Capability traits for the external collaborators of a call
//!
//! The call session depends only on these; each vendor gets one adapter.
//!
//! ```text
//! Speech:
//!   - RecognizeStream: audio frames in, transcript events out
//!   - SynthesizeStream: one text chunk in, raw audio bytes out
//!
//! Language models:
//!   - GenerateStream: message history in, token stream out
//!
//! Transport:
//!   - AudioSink: outbound frames plus the clear signal
//!
//! Observability:
//!   - TurnRecordSink: one record per finished turn
//! ```

mod llm;
mod observability;
mod speech;
mod transport;

pub use llm::{GenerateStream, TokenStream};
pub use observability::{NoopTurnSink, TurnRecordSink};
pub use speech::{
    AudioByteStream, RecognitionConfig, RecognitionSession, RecognizeStream, SynthesizeStream,
};
pub use transport::AudioSink;

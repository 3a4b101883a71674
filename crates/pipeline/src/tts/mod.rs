//! Text-to-speech adapters

mod deepgram;

pub use deepgram::DeepgramSynthesizer;

//! Speech service traits

use crate::{AudioFormat, AudioFrame, Result, TranscriptEvent};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Raw synthesized audio in provider-sized pieces
pub type AudioByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Parameters for opening a recognition stream
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionConfig {
    /// Format of the frames that will be sent
    pub format: AudioFormat,
    /// BCP-47 language tag
    pub language: String,
    /// Ask the service for interim results
    pub interim_results: bool,
    /// Service-side endpointing silence, in ms
    pub endpointing_ms: u32,
    /// Service-side utterance-end window, in ms
    pub utterance_end_ms: Option<u32>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::telephony(),
            language: "en-US".to_string(),
            interim_results: true,
            endpointing_ms: 180,
            utterance_end_ms: Some(1000),
        }
    }
}

/// An open duplex recognition stream.
///
/// Dropping `audio_tx` tells the adapter to finish the stream. `events`
/// yields `Err` items for mid-stream failures and closes when the
/// service side is gone.
pub struct RecognitionSession {
    pub audio_tx: mpsc::Sender<AudioFrame>,
    pub events: mpsc::Receiver<Result<TranscriptEvent>>,
}

/// Streaming speech-to-text
///
/// Implementations:
/// - `DeepgramRecognizer` - Deepgram live transcription over WebSocket
#[async_trait]
pub trait RecognizeStream: Send + Sync + 'static {
    /// Open a recognition stream
    ///
    /// Connection failures are returned here, before any event.
    async fn connect(&self, config: &RecognitionConfig) -> Result<RecognitionSession>;

    /// Provider name for logging
    fn provider_name(&self) -> &str;
}

/// Streaming text-to-speech
///
/// Implementations:
/// - `DeepgramSynthesizer` - Deepgram Aura over streaming HTTP
#[async_trait]
pub trait SynthesizeStream: Send + Sync + 'static {
    /// Synthesize one chunk of text
    ///
    /// Returns raw audio bytes in [`SynthesizeStream::output_format`], in
    /// provider-sized pieces. The stream ends early once `cancel` fires.
    async fn synthesize(&self, text: &str, cancel: CancellationToken) -> Result<AudioByteStream>;

    /// Encoding and rate of the produced bytes
    fn output_format(&self) -> AudioFormat;

    /// Provider name for logging
    fn provider_name(&self) -> &str;
}

//! Deepgram live transcription over WebSocket
//!
//! Audio frames are sent as binary messages in their wire encoding.
//! `Results` messages become transcript events, `UtteranceEnd` becomes a
//! bare endpoint event, and `Error` messages end the stream.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use voxcall_config::RecognizerConfig;
use voxcall_core::{
    AudioFrame, RecognitionConfig, RecognitionSession, RecognizeStream, Result, Service,
    TranscriptEvent,
};

use crate::PipelineError;

const AUDIO_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 64;

/// Incoming Deepgram message, tagged by `type`
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum DeepgramMessage {
    Results {
        channel: DeepgramChannel,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
    },
    UtteranceEnd {},
    Error {
        #[serde(default)]
        description: String,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    #[serde(default)]
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    #[serde(default)]
    transcript: String,
}

/// Deepgram streaming recognizer
#[derive(Debug, Clone)]
pub struct DeepgramRecognizer {
    config: RecognizerConfig,
}

impl DeepgramRecognizer {
    pub fn new(config: RecognizerConfig) -> Self {
        Self { config }
    }

    /// Listen URL with the stream parameters as query pairs
    pub fn build_url(&self, stream: &RecognitionConfig) -> std::result::Result<Url, PipelineError> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| PipelineError::Config(format!("Invalid recognizer URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("model", &self.config.model)
                .append_pair("language", &stream.language)
                .append_pair("encoding", stream.format.encoding.as_str())
                .append_pair("sample_rate", &stream.format.sample_rate.as_u32().to_string())
                .append_pair("channels", "1")
                .append_pair("interim_results", &stream.interim_results.to_string())
                .append_pair("endpointing", &stream.endpointing_ms.to_string())
                .append_pair("smart_format", &self.config.smart_format.to_string())
                .append_pair("punctuate", "true");
            if let Some(utterance_end) = stream.utterance_end_ms {
                query.append_pair("utterance_end_ms", &utterance_end.to_string());
            }
        }
        Ok(url)
    }

    /// Parse one text message.
    ///
    /// `Ok(None)` for messages that carry no transcript information.
    pub fn parse_message(text: &str) -> Result<Option<TranscriptEvent>> {
        let message: DeepgramMessage = serde_json::from_str(text).map_err(|e| PipelineError::Malformed {
            service: Service::Recognizer,
            message: e.to_string(),
        })?;

        match message {
            DeepgramMessage::Results {
                channel,
                is_final,
                speech_final,
            } => {
                let transcript = channel
                    .alternatives
                    .into_iter()
                    .next()
                    .map(|a| a.transcript)
                    .unwrap_or_default();

                if !is_final && transcript.trim().is_empty() {
                    return Ok(None);
                }
                let event = if is_final {
                    TranscriptEvent::final_text(transcript)
                } else {
                    TranscriptEvent::interim(transcript)
                };
                Ok(Some(if speech_final {
                    event.with_endpoint()
                } else {
                    event
                }))
            }
            DeepgramMessage::UtteranceEnd {} => Ok(Some(TranscriptEvent::utterance_end())),
            DeepgramMessage::Error {
                description,
                message,
            } => {
                let detail = if description.is_empty() { message } else { description };
                Err(PipelineError::SttStream(detail).into())
            }
            DeepgramMessage::Other => Ok(None),
        }
    }
}

#[async_trait]
impl RecognizeStream for DeepgramRecognizer {
    async fn connect(&self, stream: &RecognitionConfig) -> Result<RecognitionSession> {
        let url = self.build_url(stream)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.api_key))
            .map_err(|e| PipelineError::Config(format!("Invalid API key: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| PipelineError::SttConnect(e.to_string()))?;
        tracing::info!(model = %self.config.model, "Connected to Deepgram");

        let (audio_tx, audio_rx) = mpsc::channel::<AudioFrame>(AUDIO_QUEUE);
        let (event_tx, events) = mpsc::channel(EVENT_QUEUE);
        tokio::spawn(pump(socket, audio_rx, event_tx));

        Ok(RecognitionSession { audio_tx, events })
    }

    fn provider_name(&self) -> &str {
        "deepgram"
    }
}

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection task: audio out, transcript events in.
///
/// Ends when the service closes or fails, or when the event receiver is
/// dropped. A dropped audio sender sends `CloseStream` and keeps reading
/// until the service flushes its last results.
async fn pump(
    socket: Socket,
    mut audio_rx: mpsc::Receiver<AudioFrame>,
    event_tx: mpsc::Sender<Result<TranscriptEvent>>,
) {
    let (mut write, mut read) = socket.split();
    let mut audio_open = true;

    loop {
        tokio::select! {
            frame = audio_rx.recv(), if audio_open => match frame {
                Some(frame) => {
                    if let Err(e) = write.send(Message::Binary(frame.payload.into())).await {
                        let _ = event_tx.send(Err(PipelineError::SttStream(e.to_string()).into())).await;
                        break;
                    }
                }
                None => {
                    audio_open = false;
                    let close = r#"{"type":"CloseStream"}"#.to_string();
                    if write.send(Message::Text(close.into())).await.is_err() {
                        break;
                    }
                }
            },
            message = read.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => DeepgramRecognizer::parse_message(&text.to_string()),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "Deepgram closed the stream");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => Err(PipelineError::SttStream(e.to_string()).into()),
                    None => break,
                };
                let fatal = matches!(&event, Err(e) if !matches!(e.kind(), voxcall_core::ErrorKind::Malformed));
                match event {
                    Ok(None) => {}
                    Ok(Some(event)) => {
                        if event_tx.send(Ok(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if event_tx.send(Err(e)).await.is_err() || fatal {
                            break;
                        }
                    }
                }
            }
        }
    }

    let _ = write.close().await;
    tracing::debug!("Deepgram connection task finished");
}

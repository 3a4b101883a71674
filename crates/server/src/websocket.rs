//! Media-stream WebSocket handler
//!
//! One socket carries one call. Carrier events are mapped onto session
//! inputs; outbound audio and clears are written back by a
//! dedicated writer task so the session never waits on the socket.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use voxcall_pipeline::{CallServices, CallSession, SessionInput};
use voxcall_transport::{InboundEvent, MediaStreamSink, OutboundEvent, StartMetadata, TransportError};

use crate::metrics::PrometheusTurnSink;
use crate::state::AppState;

const INBOUND_QUEUE: usize = 128;
const OUTBOUND_QUEUE: usize = 256;

/// Media-stream WebSocket handler
pub struct MediaStreamHandler;

impl MediaStreamHandler {
    /// Handle WebSocket upgrade
    pub async fn handle(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
        ws.on_upgrade(move |socket| Self::handle_socket(socket, state))
    }

    async fn handle_socket(socket: WebSocket, state: AppState) {
        let (mut sender, mut receiver) = socket.split();

        let Some((stream_sid, start)) = wait_for_start(&mut receiver).await else {
            tracing::debug!("Media stream closed before start");
            return;
        };

        if let Some(format) = &start.media_format {
            if !format.is_telephony() {
                tracing::warn!(stream_sid = %stream_sid, format = ?format, "Unsupported media format");
                let _ = sender.send(Message::Close(None)).await;
                return;
            }
        }

        let _guard = match state.register_call(&stream_sid, &start.call_sid) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(stream_sid = %stream_sid, error = %e, "Call rejected");
                let _ = sender.send(Message::Close(None)).await;
                return;
            }
        };
        tracing::info!(stream_sid = %stream_sid, call_id = %start.call_sid, "Media stream started");

        let (out_tx, mut out_rx) = mpsc::channel::<OutboundEvent>(OUTBOUND_QUEUE);
        let writer = tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping unserializable outbound event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sender.close().await;
        });

        let services = CallServices {
            recognizer: state.services.recognizer.clone(),
            llm: state.services.llm.clone(),
            tts: state.services.tts.clone(),
            sink: Arc::new(MediaStreamSink::new(stream_sid.clone(), out_tx)),
            turn_sink: Arc::new(PrometheusTurnSink),
        };
        let session = CallSession::new(
            start.call_sid.clone(),
            stream_sid.clone(),
            state.session_config.clone(),
            services,
        );

        let (input_tx, input_rx) = mpsc::channel(INBOUND_QUEUE);
        let cancel = CancellationToken::new();
        let mut session_task = tokio::spawn(session.run(input_rx, cancel.clone()));

        let mut sequence = 0u64;
        let finished = loop {
            tokio::select! {
                joined = &mut session_task => break Some(joined),
                message = receiver.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let input = match InboundEvent::parse(&text)
                            .and_then(|event| session_input(event, &stream_sid, &mut sequence))
                        {
                            Ok(Some(input)) => input,
                            Ok(None) => continue,
                            Err(e) => {
                                tracing::debug!(stream_sid = %stream_sid, error = %e, "Ignoring media-stream message");
                                continue;
                            }
                        };
                        let stop = input == SessionInput::Stop;
                        if input_tx.send(input).await.is_err() || stop {
                            break None;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(stream_sid = %stream_sid, error = %e, "Media stream socket error");
                        cancel.cancel();
                        break None;
                    }
                },
            }
        };

        // Closing the input channel stops the session if no stop arrived
        drop(input_tx);
        let joined = match finished {
            Some(joined) => joined,
            None => session_task.await,
        };
        match joined {
            Ok(Ok(summary)) => tracing::info!(
                stream_sid = %stream_sid,
                turns = summary.turns,
                barge_ins = summary.barge_ins,
                duration_ms = summary.duration.as_millis() as u64,
                "Media stream finished"
            ),
            Ok(Err(e)) => tracing::error!(stream_sid = %stream_sid, error = %e, "Call session failed"),
            Err(e) => tracing::error!(stream_sid = %stream_sid, error = %e, "Call session task panicked"),
        }

        let _ = writer.await;
    }
}

/// Read until the carrier announces the stream
async fn wait_for_start(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
) -> Option<(String, StartMetadata)> {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match InboundEvent::parse(&text) {
                Ok(InboundEvent::Start { stream_sid, start }) => return Some((stream_sid, start)),
                Ok(InboundEvent::Connected { protocol }) => {
                    tracing::debug!(protocol = ?protocol, "Media stream connected");
                }
                Ok(InboundEvent::Stop { .. }) => return None,
                Ok(other) => tracing::debug!(event = ?other, "Event before start ignored"),
                Err(e) => tracing::debug!(error = %e, "Ignoring media-stream message"),
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Media stream socket error");
                return None;
            }
        }
    }
    None
}

/// Map a carrier event onto a session input.
///
/// Events for another stream, outbound-track media and repeated
/// connect/start messages produce nothing.
pub fn session_input(
    event: InboundEvent,
    stream_sid: &str,
    sequence: &mut u64,
) -> Result<Option<SessionInput>, TransportError> {
    match event {
        InboundEvent::Media { stream_sid: sid, media } => {
            if sid != stream_sid || media.track.as_deref().is_some_and(|t| t != "inbound") {
                return Ok(None);
            }
            let frame = media.decode(*sequence)?;
            *sequence += 1;
            Ok(Some(SessionInput::Audio(frame)))
        }
        InboundEvent::Stop { stream_sid: sid } if sid == stream_sid => Ok(Some(SessionInput::Stop)),
        _ => Ok(None),
    }
}

//! Recognition stream owner
//!
//! Keeps one recognizer connection open for the call, forwards inbound
//! audio to it and relays its transcript events in arrival order.
//! Malformed service output is dropped. A broken or closed stream is
//! reopened after the policy's backoff. Once `max_retries` streams in a row
//! drop without yielding a transcript, or a reconnect fails, the error is
//! passed on and the task ends.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use voxcall_core::{
    AudioFrame, Error, ErrorKind, RecognitionConfig, RecognitionSession, RecognizeStream, Result,
    Service, TranscriptEvent,
};

use crate::metric_names;
use crate::retry::RetryPolicy;

/// Why one connection stopped
enum StreamEnd {
    /// Inbound audio finished or the call was cancelled
    Done,
    /// Service side failed or hung up
    Lost {
        error: Error,
        /// Whether any transcript arrived before the drop
        delivered: bool,
    },
}

pub struct RecognitionAdapter {
    recognizer: Arc<dyn RecognizeStream>,
    config: RecognitionConfig,
    retry: RetryPolicy,
}

impl RecognitionAdapter {
    pub fn new(
        recognizer: Arc<dyn RecognizeStream>,
        config: RecognitionConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            recognizer,
            config,
            retry,
        }
    }

    async fn open(&self, cancel: &CancellationToken) -> Result<RecognitionSession> {
        self.retry
            .connect(Service::Recognizer, cancel, || self.recognizer.connect(&self.config))
            .await
    }

    /// Worker body
    pub async fn run(
        self,
        mut audio: mpsc::Receiver<AudioFrame>,
        events: mpsc::Sender<Result<TranscriptEvent>>,
        cancel: CancellationToken,
    ) {
        let mut connections = 0u32;
        let mut barren_drops = 0u32;
        loop {
            let session = match self.open(&cancel).await {
                Ok(session) => session,
                Err(e) if e.is_cancelled() => return,
                Err(e) => return self.give_up(e, &events).await,
            };
            connections += 1;
            if connections > 1 {
                tracing::info!(connections, "Recognizer reconnected");
            }

            let (error, delivered) = match self.pump(session, &mut audio, &events, &cancel).await {
                StreamEnd::Done => return,
                StreamEnd::Lost { error, delivered } => (error, delivered),
            };

            barren_drops = if delivered { 0 } else { barren_drops + 1 };
            if barren_drops > self.retry.max_retries {
                tracing::warn!(drops = barren_drops, "Recognition stream keeps dropping");
                return self.give_up(error, &events).await;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.retry.backoff) => {}
            }
        }
    }

    async fn give_up(&self, error: Error, events: &mpsc::Sender<Result<TranscriptEvent>>) {
        tracing::error!(
            provider = self.recognizer.provider_name(),
            error = %error,
            "Recognizer unavailable"
        );
        metrics::counter!(
            metric_names::ERRORS,
            "stage" => "recognition",
            "kind" => error.kind().as_str()
        )
        .increment(1);
        let _ = events.send(Err(error)).await;
    }

    async fn pump(
        &self,
        session: RecognitionSession,
        audio: &mut mpsc::Receiver<AudioFrame>,
        events: &mpsc::Sender<Result<TranscriptEvent>>,
        cancel: &CancellationToken,
    ) -> StreamEnd {
        let RecognitionSession {
            audio_tx,
            events: mut incoming,
        } = session;
        let mut delivered = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Done,
                event = incoming.recv() => match event {
                    Some(Ok(event)) => {
                        delivered = true;
                        if events.send(Ok(event)).await.is_err() {
                            return StreamEnd::Done;
                        }
                    }
                    Some(Err(e)) if e.kind() == ErrorKind::Malformed => {
                        tracing::debug!(error = %e, "Dropping malformed recognizer output");
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Recognition stream failed");
                        metrics::counter!(
                            metric_names::ERRORS,
                            "stage" => "recognition",
                            "kind" => e.kind().as_str()
                        )
                        .increment(1);
                        return StreamEnd::Lost { error: e, delivered };
                    }
                    None => {
                        tracing::warn!("Recognition stream closed by the service");
                        return StreamEnd::Lost {
                            error: Error::stream(Service::Recognizer, "stream closed by the service"),
                            delivered,
                        };
                    }
                },
                frame = audio.recv() => match frame {
                    Some(frame) => {
                        if audio_tx.send(frame).await.is_err() {
                            tracing::warn!("Recognition stream stopped accepting audio");
                            return StreamEnd::Lost {
                                error: Error::stream(Service::Recognizer, "stream stopped accepting audio"),
                                delivered,
                            };
                        }
                    }
                    None => return StreamEnd::Done,
                },
            }
        }
    }
}

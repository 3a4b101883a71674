//! Dialog engine
//!
//! Streams a reply from the generator and hands each completed sentence to
//! synthesis as soon as it is available. History is only touched through
//! [`DialogEngine::begin_turn`] and [`DialogEngine::commit`], both called by
//! the session, so a cancelled reply never reaches the history.

mod chunker;

pub use chunker::SentenceChunker;

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use voxcall_config::DialogConfig;
use voxcall_core::{
    DialogHistory, Error, GenerateRequest, GenerateStream, Result, Service, SpeechChunk,
};

use crate::retry::RetryPolicy;
use crate::turn::{JobId, TurnEvent};

/// Streaming reply generation for one call
pub struct DialogEngine {
    llm: Arc<dyn GenerateStream>,
    config: DialogConfig,
    retry: RetryPolicy,
}

impl DialogEngine {
    pub fn new(llm: Arc<dyn GenerateStream>, config: DialogConfig, retry: RetryPolicy) -> Self {
        Self { llm, config, retry }
    }

    pub fn config(&self) -> &DialogConfig {
        &self.config
    }

    /// Fresh history for a call
    pub fn new_history(&self) -> DialogHistory {
        DialogHistory::new(Some(&self.config.system_prompt), self.config.history_limit)
    }

    /// Record the user utterance and build the request for it
    pub fn begin_turn(&self, history: &mut DialogHistory, utterance: &str) -> GenerateRequest {
        history.push_user(utterance);
        GenerateRequest::from_messages(history.snapshot())
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature)
    }

    /// Append a completed reply. Blank replies are not recorded.
    pub fn commit(&self, history: &mut DialogHistory, response: &str) -> bool {
        let response = response.trim();
        if response.is_empty() {
            return false;
        }
        history.push_assistant(response);
        true
    }

    /// Generation worker body.
    ///
    /// Emits chunks in order on `chunks` and reports progress on `events`.
    /// Returns quietly once `cancel` fires. `chunks` is dropped after the
    /// final event so playback sees the end of the reply.
    pub async fn stream_reply(
        self: Arc<Self>,
        job: JobId,
        request: GenerateRequest,
        chunks: mpsc::Sender<SpeechChunk>,
        events: mpsc::Sender<TurnEvent>,
        cancel: CancellationToken,
    ) {
        match self.generate(job, request, &chunks, &events, &cancel).await {
            Ok(response) => {
                let _ = events.send(TurnEvent::GenerationDone { job, response }).await;
            }
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                tracing::debug!(job = %job, "Generation cancelled");
            }
            Err(error) => {
                tracing::warn!(job = %job, error = %error, "Generation failed");
                let _ = events.send(TurnEvent::GenerationFailed { job, error }).await;
            }
        }
    }

    async fn generate(
        &self,
        job: JobId,
        request: GenerateRequest,
        chunks: &mpsc::Sender<SpeechChunk>,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut tokens = self
            .retry
            .connect(Service::Generator, cancel, || {
                self.llm.generate_stream(request.clone(), cancel.child_token())
            })
            .await?;

        let mut chunker = SentenceChunker::new();
        let mut spoken: Vec<String> = Vec::new();
        let mut first_token = true;

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                item = tokens.next() => item,
            };

            let chunk = match item {
                None => break,
                Some(chunk) => chunk?,
            };

            if !chunk.delta.is_empty() {
                if first_token {
                    first_token = false;
                    let _ = events.send(TurnEvent::FirstToken(job)).await;
                }
                for sentence in chunker.push(&chunk.delta) {
                    self.emit(job, sentence, &mut spoken, chunks, events, cancel)
                        .await?;
                }
            }

            if chunk.is_final {
                break;
            }
        }

        if let Some(rest) = chunker.flush() {
            self.emit(job, rest, &mut spoken, chunks, events, cancel)
                .await?;
        }

        tracing::debug!(job = %job, chunks = spoken.len(), "Generation complete");
        Ok(spoken.join(" "))
    }

    async fn emit(
        &self,
        job: JobId,
        text: String,
        spoken: &mut Vec<String>,
        chunks: &mpsc::Sender<SpeechChunk>,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let index = spoken.len();
        if index == 0 {
            let _ = events.send(TurnEvent::FirstChunk(job)).await;
        }
        tracing::debug!(job = %job, index, chunk = %text, "Speech chunk ready");

        let chunk = SpeechChunk::new(text.clone(), index, job.0);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sent = chunks.send(chunk) => sent.map_err(|_| Error::ChannelClosed)?,
        }
        spoken.push(text);
        Ok(())
    }
}

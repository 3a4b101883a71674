//! OpenAI-compatible chat completion backend
//!
//! Works with any server exposing `POST {base_url}/chat/completions` with
//! `stream: true` (Groq, OpenAI, vLLM, Ollama's OpenAI mode).

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use voxcall_config::GeneratorConfig;
use voxcall_core::{
    FinishReason, GenerateRequest, GenerateStream, Message, Result, Role, StreamChunk,
    TokenStream,
};

use crate::sse::{SseBuffer, SseEvent};
use crate::LlmError;

/// Streaming chat backend
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    config: GeneratorConfig,
    client: Client,
}

impl OpenAiBackend {
    pub fn new(config: GeneratorConfig) -> std::result::Result<Self, LlmError> {
        if config.base_url.trim().is_empty() {
            return Err(LlmError::Configuration("Generator base URL is empty".to_string()));
        }
        if config.api_key.is_empty() {
            tracing::warn!(base_url = %config.base_url, "Generator API key is empty");
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request<'a>(&'a self, request: &'a GenerateRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: request.messages.iter().map(ChatMessage::from).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        }
    }

    /// Decode one `data:` payload.
    ///
    /// Returns the text delta (possibly empty) and the finish reason if the
    /// choice carries one.
    pub fn parse_chunk(
        data: &str,
    ) -> std::result::Result<(String, Option<FinishReason>), LlmError> {
        let chunk: ChatStreamChunk =
            serde_json::from_str(data).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok((String::new(), None));
        };
        let delta = choice.delta.and_then(|d| d.content).unwrap_or_default();
        let finish = choice.finish_reason.as_deref().map(FinishReason::from_openai);
        Ok((delta, finish))
    }
}

#[async_trait]
impl GenerateStream for OpenAiBackend {
    async fn generate_stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream> {
        let body = self.build_request(&request);
        tracing::debug!(
            model = body.model,
            messages = body.messages.len(),
            "Opening completion stream"
        );

        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(LlmError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let mut bytes = response.bytes_stream();
        let tokens = async_stream::stream! {
            let mut buffer = SseBuffer::new();
            'read: loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    item = bytes.next() => item,
                };
                let chunk = match item {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        yield Err(LlmError::Interrupted(e.to_string()).into());
                        break;
                    }
                    None => {
                        if !cancel.is_cancelled() {
                            yield Ok(StreamChunk::final_chunk(FinishReason::Stop));
                        }
                        break;
                    }
                };

                for event in buffer.push(&chunk) {
                    let data = match event {
                        SseEvent::Done => {
                            yield Ok(StreamChunk::final_chunk(FinishReason::Stop));
                            break 'read;
                        }
                        SseEvent::Data(data) => data,
                    };
                    match OpenAiBackend::parse_chunk(&data) {
                        Ok((delta, finish)) => {
                            if !delta.is_empty() {
                                yield Ok(StreamChunk::text(delta));
                            }
                            if let Some(reason) = finish {
                                yield Ok(StreamChunk::final_chunk(reason));
                                break 'read;
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "Skipping unparseable stream chunk"),
                    }
                }
            }
        };
        Ok(Box::pin(tokens))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for ChatMessage<'a> {
    fn from(message: &'a Message) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            role,
            content: &message.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: Option<ChatDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> OpenAiBackend {
        OpenAiBackend::new(GeneratorConfig {
            base_url: "http://localhost:8000/v1/".into(),
            api_key: "test".into(),
            ..GeneratorConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_chat_url() {
        assert_eq!(backend().chat_url(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_request_serialization() {
        let backend = backend();
        let request = GenerateRequest::from_messages(vec![
            Message::system("Be brief."),
            Message::user("Hi"),
        ])
        .with_max_tokens(64);

        let json = serde_json::to_value(backend.build_request(&request)).unwrap();
        assert_eq!(json["model"], "llama-3.3-70b-versatile");
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 64);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Hi");
    }

    #[test]
    fn test_parse_delta_and_finish() {
        let (delta, finish) = OpenAiBackend::parse_chunk(
            r#"{"choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(delta, "Hello");
        assert_eq!(finish, None);

        let (delta, finish) = OpenAiBackend::parse_chunk(
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"length"}]}"#,
        )
        .unwrap();
        assert!(delta.is_empty());
        assert_eq!(finish, Some(FinishReason::Length));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(OpenAiBackend::parse_chunk("not json").is_err());
        let (delta, finish) = OpenAiBackend::parse_chunk(r#"{"choices":[]}"#).unwrap();
        assert!(delta.is_empty() && finish.is_none());
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let config = GeneratorConfig {
            base_url: " ".into(),
            ..GeneratorConfig::default()
        };
        assert!(OpenAiBackend::new(config).is_err());
    }
}

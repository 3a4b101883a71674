//! Language model traits

use crate::{GenerateRequest, Result, StreamChunk};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Incremental token stream, terminated by a final chunk or by closing
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Streaming chat completion
///
/// Implementations:
/// - `OpenAiCompatBackend` - any OpenAI-compatible `/chat/completions` endpoint
///
/// # Example
///
/// ```ignore
/// let llm: Arc<dyn GenerateStream> = Arc::new(OpenAiCompatBackend::new(config)?);
/// let request = GenerateRequest::from_messages(history.snapshot());
/// let mut tokens = llm.generate_stream(request, cancel.child_token()).await?;
/// while let Some(chunk) = tokens.next().await { /* ... */ }
/// ```
#[async_trait]
pub trait GenerateStream: Send + Sync + 'static {
    /// Open a token stream over the full message history
    ///
    /// Connection failures are returned before the first item; failures
    /// after that are `Err` items. The stream stops once `cancel` fires.
    async fn generate_stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

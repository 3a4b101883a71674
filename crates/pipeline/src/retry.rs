//! Connection retry with exponential backoff
//!
//! Only connection-class failures are retried. Each attempt runs under the
//! connect deadline and every wait observes the cancellation token.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use voxcall_config::RetryConfig;
use voxcall_core::{Error, Result, Service};

/// Retry policy for opening service streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub max_retries: u32,
    /// Initial backoff duration (doubles each retry)
    pub backoff: Duration,
    /// Deadline for a single attempt
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Run `connect` until it succeeds, fails with a non-retryable error,
    /// or the attempts are used up.
    pub async fn connect<T, F, Fut>(
        &self,
        service: Service,
        cancel: &CancellationToken,
        mut connect: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.backoff;
        let mut attempt = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = tokio::time::timeout(self.connect_timeout, connect()) => {
                    result.unwrap_or(Err(Error::Timeout(service)))
                }
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => e,
                Err(e) => return Err(e),
            };

            attempt += 1;
            tracing::warn!(
                service = %service,
                error = %error,
                attempt,
                max_retries = self.max_retries,
                "Connection failed, retrying in {:?}",
                backoff
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff *= 2;
        }
    }
}

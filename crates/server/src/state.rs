//! Application State
//!
//! Shared state across all handlers. Service clients are built once and
//! shared by every call; per-call state lives in the call session.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusHandle;
use voxcall_config::Settings;
use voxcall_core::{GenerateStream, RecognizeStream, SynthesizeStream};
use voxcall_llm::OpenAiBackend;
use voxcall_pipeline::{DeepgramRecognizer, DeepgramSynthesizer, SessionConfig};

use crate::metrics::{ACTIVE_CALLS, CALLS};
use crate::ServerError;

/// Speech and language clients shared across calls
#[derive(Clone)]
pub struct SharedServices {
    pub recognizer: Arc<dyn RecognizeStream>,
    pub llm: Arc<dyn GenerateStream>,
    pub tts: Arc<dyn SynthesizeStream>,
}

impl SharedServices {
    /// Build the production clients from settings
    pub fn from_settings(settings: &Settings) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.retry.connect_timeout_ms))
            .build()
            .map_err(|e| ServerError::Config(format!("HTTP client: {e}")))?;

        let llm = OpenAiBackend::new(settings.generator.clone())
            .map_err(|e| ServerError::Config(e.to_string()))?;
        let tts = DeepgramSynthesizer::new(client, settings.synthesizer.clone())
            .map_err(|e| ServerError::Config(e.to_string()))?;

        Ok(Self {
            recognizer: Arc::new(DeepgramRecognizer::new(settings.recognizer.clone())),
            llm: Arc::new(llm),
            tts: Arc::new(tts),
        })
    }
}

/// Bookkeeping for one live call
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub call_id: String,
    pub started_at: DateTime<Utc>,
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub session_config: SessionConfig,
    pub services: SharedServices,
    /// Live calls keyed by stream id
    pub calls: Arc<DashMap<String, CallInfo>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        services: SharedServices,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, ServerError> {
        let session_config = SessionConfig::from_settings(&settings)?;
        Ok(Self {
            settings: Arc::new(settings),
            session_config,
            services,
            calls: Arc::new(DashMap::new()),
            metrics,
        })
    }

    /// State with the production service clients
    pub fn from_settings(
        settings: Settings,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, ServerError> {
        let services = SharedServices::from_settings(&settings)?;
        Self::new(settings, services, metrics)
    }

    pub fn active_calls(&self) -> usize {
        self.calls.len()
    }

    /// Register a call; refused once `max_calls` are live.
    ///
    /// The call stays registered until the returned guard is dropped.
    pub fn register_call(
        &self,
        stream_id: &str,
        call_id: &str,
    ) -> Result<CallGuard, ServerError> {
        let max_calls = self.settings.server.max_calls;
        if self.calls.len() >= max_calls {
            tracing::warn!(stream_id, max_calls, "Refusing call, limit reached");
            return Err(ServerError::CallLimit(max_calls));
        }

        self.calls.insert(
            stream_id.to_string(),
            CallInfo {
                call_id: call_id.to_string(),
                started_at: Utc::now(),
            },
        );
        metrics::counter!(CALLS).increment(1);
        metrics::gauge!(ACTIVE_CALLS).set(self.calls.len() as f64);

        Ok(CallGuard {
            calls: self.calls.clone(),
            stream_id: stream_id.to_string(),
        })
    }
}

/// Removes its call from the live set when dropped
pub struct CallGuard {
    calls: Arc<DashMap<String, CallInfo>>,
    stream_id: String,
}

impl CallGuard {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if let Some((_, info)) = self.calls.remove(&self.stream_id) {
            let seconds = (Utc::now() - info.started_at).num_milliseconds() as f64 / 1000.0;
            tracing::debug!(stream_id = %self.stream_id, call_id = %info.call_id, seconds, "Call unregistered");
        }
        metrics::gauge!(ACTIVE_CALLS).set(self.calls.len() as f64);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use voxcall_core::{
        AudioByteStream, AudioFormat, Error, GenerateRequest, RecognitionConfig,
        RecognitionSession, Result, Service, TokenStream,
    };

    /// Services that refuse every connection
    pub struct Offline;

    #[async_trait]
    impl RecognizeStream for Offline {
        async fn connect(&self, _config: &RecognitionConfig) -> Result<RecognitionSession> {
            Err(Error::connect(Service::Recognizer, "offline"))
        }

        fn provider_name(&self) -> &str {
            "offline"
        }
    }

    #[async_trait]
    impl GenerateStream for Offline {
        async fn generate_stream(
            &self,
            _request: GenerateRequest,
            _cancel: CancellationToken,
        ) -> Result<TokenStream> {
            Err(Error::connect(Service::Generator, "offline"))
        }

        fn model_name(&self) -> &str {
            "offline"
        }
    }

    #[async_trait]
    impl SynthesizeStream for Offline {
        async fn synthesize(&self, _text: &str, _cancel: CancellationToken) -> Result<AudioByteStream> {
            Err(Error::connect(Service::Synthesizer, "offline"))
        }

        fn output_format(&self) -> AudioFormat {
            AudioFormat::telephony()
        }

        fn provider_name(&self) -> &str {
            "offline"
        }
    }

    pub fn state(max_calls: usize) -> AppState {
        let mut settings = Settings::default();
        settings.server.max_calls = max_calls;
        let offline = Arc::new(Offline);
        let services = SharedServices {
            recognizer: offline.clone(),
            llm: offline.clone(),
            tts: offline,
        };
        AppState::new(settings, services, None).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::state;

    #[test]
    fn test_call_guard_releases_slot() {
        let state = state(1);
        let guard = state.register_call("MZ1", "CA1").unwrap();
        assert_eq!(state.active_calls(), 1);
        assert_eq!(guard.stream_id(), "MZ1");
        assert!(state.register_call("MZ2", "CA2").is_err());

        drop(guard);
        assert_eq!(state.active_calls(), 0);
        assert!(state.register_call("MZ2", "CA2").is_ok());
    }

    #[test]
    fn test_default_settings_build_production_state() {
        let state = super::AppState::from_settings(voxcall_config::Settings::default(), None).unwrap();
        assert_eq!(state.active_calls(), 0);
        assert!(state.metrics.is_none());
    }
}

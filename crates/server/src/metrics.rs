//! Prometheus metrics
//!
//! The recorder is installed once by the binary; everything else records
//! through the `metrics` facade.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use voxcall_core::{TurnRecord, TurnRecordSink};

use crate::state::AppState;

pub const TURN_TOTAL_MS: &str = "voxcall_turn_total_ms";
pub const STT_MS: &str = "voxcall_stt_ms";
pub const LLM_TTFT_MS: &str = "voxcall_llm_ttft_ms";
pub const TTS_TTFB_MS: &str = "voxcall_tts_ttfb_ms";
pub const TURNS: &str = "voxcall_turns_total";
pub const CALLS: &str = "voxcall_calls_total";
pub const ACTIVE_CALLS: &str = "voxcall_active_calls";

/// Install the global Prometheus recorder
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Prometheus recorder");
            None
        }
    }
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics disabled\n".to_string(),
        ),
    }
}

/// Turn records as latency histograms and an outcome counter
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusTurnSink;

impl TurnRecordSink for PrometheusTurnSink {
    fn record(&self, record: &TurnRecord) {
        metrics::counter!(TURNS, "outcome" => record.outcome.as_str()).increment(1);

        let Some(summary) = record.summary else {
            return;
        };
        metrics::histogram!(TURN_TOTAL_MS).record(summary.total_ms as f64);
        if let Some(ms) = summary.stt_ms {
            metrics::histogram!(STT_MS).record(ms as f64);
        }
        if let Some(ms) = summary.llm_ttft_ms {
            metrics::histogram!(LLM_TTFT_MS).record(ms as f64);
        }
        if let Some(ms) = summary.tts_ttfb_ms {
            metrics::histogram!(TTS_TTFB_MS).record(ms as f64);
        }
    }
}

//! Voice call server
//!
//! Accepts telephony media streams over WebSocket and runs one call
//! session per stream. Also serves health and Prometheus endpoints.

pub mod http;
pub mod metrics;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use metrics::{init_metrics, PrometheusTurnSink};
pub use state::{AppState, CallGuard, CallInfo, SharedServices};
pub use websocket::MediaStreamHandler;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Call limit reached ({0})")]
    CallLimit(usize),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::CallLimit(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::WebSocket(_) | ServerError::Protocol(_) => {
                axum::http::StatusCode::BAD_REQUEST
            }
            ServerError::Config(_) | ServerError::Internal(_) => {
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<voxcall_core::Error> for ServerError {
    fn from(err: voxcall_core::Error) -> Self {
        match err {
            voxcall_core::Error::Config(message) => ServerError::Config(message),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

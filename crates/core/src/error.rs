//! Unified error type
//!
//! Every crate-local error converts into [`Error`]. The call session only
//! looks at [`Error::kind`] to decide between retry, fallback and discard.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External collaborator an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Recognizer,
    Generator,
    Synthesizer,
    Transport,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Recognizer => "recognizer",
            Service::Generator => "generator",
            Service::Synthesizer => "synthesizer",
            Service::Transport => "transport",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classes handled by the call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Could not open a stream; retried once, then the fallback line is spoken
    Connection,
    /// Stream broke after it was opened; handled like a cancellation
    MidStream,
    /// Unparseable or empty service output; dropped silently
    Malformed,
    /// Work was cancelled on purpose
    Cancelled,
    /// Anything else (configuration, local I/O)
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::MidStream => "mid_stream",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{service} connection failed: {message}")]
    Connect { service: Service, message: String },

    #[error("{service} stream failed: {message}")]
    Stream { service: Service, message: String },

    #[error("Malformed {service} output: {message}")]
    Malformed { service: Service, message: String },

    #[error("{0} timed out")]
    Timeout(Service),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn connect(service: Service, message: impl Into<String>) -> Self {
        Error::Connect {
            service,
            message: message.into(),
        }
    }

    pub fn stream(service: Service, message: impl Into<String>) -> Self {
        Error::Stream {
            service,
            message: message.into(),
        }
    }

    pub fn malformed(service: Service, message: impl Into<String>) -> Self {
        Error::Malformed {
            service,
            message: message.into(),
        }
    }

    /// Failure class driving recovery
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connect { .. } | Error::Timeout(_) => ErrorKind::Connection,
            Error::Stream { .. } | Error::ChannelClosed => ErrorKind::MidStream,
            Error::Malformed { .. } | Error::Serialization(_) => ErrorKind::Malformed,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Audio(_) | Error::Config(_) | Error::Io(_) => ErrorKind::Other,
        }
    }

    /// Service the error is attributed to, if any
    pub fn service(&self) -> Option<Service> {
        match self {
            Error::Connect { service, .. }
            | Error::Stream { service, .. }
            | Error::Malformed { service, .. }
            | Error::Timeout(service) => Some(*service),
            _ => None,
        }
    }

    /// Only connection-class failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

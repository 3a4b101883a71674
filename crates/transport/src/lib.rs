//! Telephony media-stream transport
//!
//! The carrier opens a WebSocket per call and exchanges JSON text frames
//! tagged by `event`:
//!
//! ```text
//! inbound:  connected, start, media (base64 µ-law), mark, stop
//! outbound: media, clear
//! ```
//!
//! [`protocol`] holds the wire types; [`MediaStreamSink`] turns outbound
//! audio into events for whatever task owns the socket writer.

pub mod protocol;
pub mod sink;

pub use protocol::{InboundEvent, MediaFormat, OutboundEvent, StartMetadata};
pub use sink::MediaStreamSink;

use thiserror::Error;
use voxcall_core::Service;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid audio payload: {0}")]
    InvalidPayload(String),

    #[error("Transport closed")]
    Closed,
}

impl From<TransportError> for voxcall_core::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidMessage(_) | TransportError::InvalidPayload(_) => {
                voxcall_core::Error::malformed(Service::Transport, err.to_string())
            }
            TransportError::Closed => voxcall_core::Error::stream(Service::Transport, "closed"),
        }
    }
}

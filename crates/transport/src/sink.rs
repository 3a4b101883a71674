//! Outbound audio sink backed by the socket writer's queue

use async_trait::async_trait;
use tokio::sync::mpsc;
use voxcall_core::{AudioFrame, AudioSink, Result};

use crate::protocol::OutboundEvent;
use crate::TransportError;

/// Queues outbound media and clear events for one stream
#[derive(Debug, Clone)]
pub struct MediaStreamSink {
    stream_sid: String,
    tx: mpsc::Sender<OutboundEvent>,
}

impl MediaStreamSink {
    pub fn new(stream_sid: impl Into<String>, tx: mpsc::Sender<OutboundEvent>) -> Self {
        Self {
            stream_sid: stream_sid.into(),
            tx,
        }
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    async fn push(&self, event: OutboundEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| TransportError::Closed.into())
    }
}

#[async_trait]
impl AudioSink for MediaStreamSink {
    async fn send_frame(&self, frame: AudioFrame) -> Result<()> {
        self.push(OutboundEvent::media(self.stream_sid.as_str(), &frame))
            .await
    }

    async fn clear(&self) -> Result<()> {
        tracing::debug!(stream_sid = %self.stream_sid, "Clearing buffered playback");
        self.push(OutboundEvent::clear(self.stream_sid.as_str())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxcall_core::{AudioFormat, ErrorKind};

    #[tokio::test]
    async fn test_frames_then_clear_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = MediaStreamSink::new("MZ1", tx);

        sink.send_frame(AudioFrame::silence(AudioFormat::telephony(), 20, 0))
            .await
            .unwrap();
        sink.clear().await.unwrap();

        assert!(matches!(rx.recv().await, Some(OutboundEvent::Media { .. })));
        assert_eq!(rx.recv().await, Some(OutboundEvent::clear("MZ1")));
    }

    #[tokio::test]
    async fn test_closed_writer_is_a_stream_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = MediaStreamSink::new("MZ1", tx);
        let err = sink.clear().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MidStream);
    }
}

//! Outbound audio transport

use crate::{AudioFrame, Result};
use async_trait::async_trait;

/// Destination for synthesized audio.
///
/// Frames are moved into the sink. `clear` asks the far end to drop
/// anything it has buffered but not yet played.
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    async fn send_frame(&self, frame: AudioFrame) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

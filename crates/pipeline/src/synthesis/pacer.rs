//! Re-framing and real-time pacing of synthesized audio

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voxcall_core::AudioFormat;

/// Cuts provider-sized byte chunks into fixed-size frame payloads
#[derive(Debug)]
pub struct FrameAssembler {
    frame_bytes: usize,
    silence: u8,
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(format: AudioFormat, frame_ms: u32) -> Self {
        let frame_bytes = format.frame_bytes(frame_ms).max(1);
        Self {
            frame_bytes,
            silence: format.encoding.silence_byte(),
            buffer: Vec::with_capacity(frame_bytes * 2),
        }
    }

    /// Append incoming bytes and return every complete frame
    pub fn push(&mut self, incoming: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(incoming);
        let complete = self.buffer.len() / self.frame_bytes;
        if complete == 0 {
            return Vec::new();
        }
        let rest = self.buffer.split_off(complete * self.frame_bytes);
        let full = std::mem::replace(&mut self.buffer, rest);
        full.chunks_exact(self.frame_bytes)
            .map(|c| c.to_vec())
            .collect()
    }

    /// Pad the remainder to a full frame with silence
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut tail = std::mem::take(&mut self.buffer);
        tail.resize(self.frame_bytes, self.silence);
        Some(tail)
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }
}

/// Deadline scheduler for outbound frames.
///
/// The first `prebuffer` frames of a run go out immediately; frame `n`
/// after that is released at `anchor + (n - prebuffer) * frame`. A slow
/// producer re-anchors instead of bursting to catch up.
#[derive(Debug)]
pub struct PlaybackPacer {
    frame: Duration,
    prebuffer: u32,
    anchor: Option<Instant>,
    sent: u32,
}

impl PlaybackPacer {
    pub fn new(frame: Duration, prebuffer: u32) -> Self {
        Self {
            frame,
            prebuffer,
            anchor: None,
            sent: 0,
        }
    }

    /// Wait until the next frame may be sent.
    ///
    /// Returns `false` if cancelled while waiting.
    pub async fn pace(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        let anchor = *self.anchor.get_or_insert(now);

        if self.sent >= self.prebuffer {
            let deadline = anchor + self.frame * (self.sent - self.prebuffer);
            if deadline > now {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            } else if now - deadline > self.frame {
                // Underrun
                let behind = self.frame * (self.sent - self.prebuffer);
                self.anchor = Some(now.checked_sub(behind).unwrap_or(now));
            }
        }

        self.sent += 1;
        true
    }

    /// Instant the far end finishes playing everything sent so far
    pub fn playout_end(&self) -> Option<Instant> {
        self.anchor.map(|anchor| anchor + self.frame * self.sent)
    }

    /// Wait for playback to drain plus `gap`, then start a new run.
    ///
    /// Returns `false` if cancelled while waiting.
    pub async fn pause(&mut self, gap: Duration, cancel: &CancellationToken) -> bool {
        let now = Instant::now();
        let wake = self.playout_end().unwrap_or(now).max(now) + gap;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep_until(wake) => {}
        }
        self.reset();
        true
    }

    pub fn reset(&mut self) {
        self.anchor = None;
        self.sent = 0;
    }

    pub fn frames_sent(&self) -> u32 {
        self.sent
    }
}

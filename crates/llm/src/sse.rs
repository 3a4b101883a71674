//! Server-sent event line buffer
//!
//! Chat completion streams arrive as `data: {json}` lines split arbitrarily
//! across network reads. [`SseBuffer`] joins the pieces back into events.

/// One decoded `data:` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    /// The `[DONE]` terminator
    Done,
}

#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and return the events completed by them.
    ///
    /// Bytes are kept until a newline arrives, so multi-byte characters
    /// split across reads decode correctly.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_line(line.trim()) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes received after the last newline
    pub fn remainder(&self) -> usize {
        self.pending.len()
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    // Comments (": keep-alive") and other fields are ignored
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }
    Some(SseEvent::Data(payload.to_string()))
}

//! Speakable text units

use serde::{Deserialize, Serialize};

/// A sentence or sentence fragment ready for synthesis.
///
/// Chunks of one turn are numbered from zero in generation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechChunk {
    pub text: String,
    /// Position within the turn
    pub index: usize,
    /// Turn the chunk belongs to
    pub turn: u64,
}

impl SpeechChunk {
    pub fn new(text: impl Into<String>, index: usize, turn: u64) -> Self {
        Self {
            text: text.into(),
            index,
            turn,
        }
    }
}

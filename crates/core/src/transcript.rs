//! Transcript events produced by the recognizer

use serde::{Deserialize, Serialize};

/// One recognizer result.
///
/// Produced by the recognition adapter and consumed immediately by the
/// endpointer; never retained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// Transcript text (may be empty for a bare utterance-end signal)
    pub text: String,
    /// Recognizer considers this text final
    pub is_final: bool,
    /// Recognizer detected the end of the utterance
    pub is_endpoint: bool,
}

impl TranscriptEvent {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            is_endpoint: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            is_endpoint: false,
        }
    }

    /// Bare utterance-end signal without text
    pub fn utterance_end() -> Self {
        Self {
            text: String::new(),
            is_final: false,
            is_endpoint: true,
        }
    }

    pub fn with_endpoint(mut self) -> Self {
        self.is_endpoint = true;
        self
    }

    /// Text with surrounding whitespace removed
    pub fn trimmed(&self) -> &str {
        self.text.trim()
    }

    pub fn is_blank(&self) -> bool {
        self.trimmed().is_empty()
    }
}

//! Utterance completeness heuristics
//!
//! The endpointer asks a [`CompletionPolicy`] whether the current text can
//! be finalized early. [`PhrasePolicy`] is the rule-based default; its word
//! lists come from configuration and default to English.

use std::collections::HashSet;
use voxcall_config::EndpointerConfig;

/// Decides whether a transcript already reads as a finished utterance
pub trait CompletionPolicy: Send + Sync + 'static {
    fn looks_complete(&self, text: &str) -> bool;
}

/// Punctuation, stock-phrase and question-pattern rules
#[derive(Debug, Clone)]
pub struct PhrasePolicy {
    phrases: HashSet<String>,
    question_starters: Vec<String>,
    min_question_words: usize,
}

impl PhrasePolicy {
    pub fn new(
        phrases: impl IntoIterator<Item = impl Into<String>>,
        question_starters: impl IntoIterator<Item = impl Into<String>>,
        min_question_words: usize,
    ) -> Self {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
            question_starters: question_starters
                .into_iter()
                .map(|s| s.into().to_lowercase())
                .collect(),
            min_question_words,
        }
    }

    pub fn from_config(config: &EndpointerConfig) -> Self {
        Self::new(
            config.complete_phrases.iter().cloned(),
            config.question_starters.iter().cloned(),
            config.min_question_words,
        )
    }

    fn ends_with_terminal(text: &str) -> bool {
        matches!(text.chars().last(), Some('.' | '?' | '!'))
    }

    fn is_question(&self, lower: &str) -> bool {
        let mut words = lower.split_whitespace();
        let Some(first) = words.next() else {
            return false;
        };
        self.question_starters.iter().any(|s| s == first)
            && 1 + words.count() >= self.min_question_words
    }
}

impl Default for PhrasePolicy {
    fn default() -> Self {
        Self::from_config(&EndpointerConfig::default())
    }
}

impl CompletionPolicy for PhrasePolicy {
    fn looks_complete(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        if Self::ends_with_terminal(text) {
            return true;
        }

        let lower = text.to_lowercase();
        self.phrases.contains(&lower) || self.is_question(&lower)
    }
}

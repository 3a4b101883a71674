//! Conversation state and dialog history

use crate::llm_types::{Message, Role};
use serde::{Deserialize, Serialize};

/// Turn-taking state of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// Waiting for the user
    #[default]
    Listening,
    /// Interim transcripts are arriving
    UserSpeaking,
    /// Utterance finalized, waiting for the first speakable chunk
    Thinking,
    /// Agent audio is being played
    Speaking,
    /// Barge-in confirmed, in-flight work is being cancelled
    Interrupted,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Listening => "listening",
            ConversationState::UserSpeaking => "user_speaking",
            ConversationState::Thinking => "thinking",
            ConversationState::Speaking => "speaking",
            ConversationState::Interrupted => "interrupted",
        }
    }

    /// Get allowed transitions from current state
    ///
    /// `Listening -> Speaking` covers the greeting and the fallback line.
    /// `Thinking -> Listening` covers failed or empty turns.
    pub fn allowed_transitions(&self) -> &'static [ConversationState] {
        use ConversationState::*;
        match self {
            Listening => &[UserSpeaking, Speaking],
            UserSpeaking => &[Thinking, Listening],
            Thinking => &[Speaking, Listening],
            Speaking => &[Interrupted, Listening],
            Interrupted => &[UserSpeaking, Listening],
        }
    }

    /// Check if transition to target state is allowed
    pub fn can_transition_to(&self, target: ConversationState) -> bool {
        self.allowed_transitions().contains(&target)
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-tagged dialog history with bounded size.
///
/// The leading system entry, if any, is never trimmed. Once `limit` is
/// exceeded the oldest exchange goes: everything up to and including the
/// first assistant entry after the oldest user entry. Users without any
/// reply yet are dropped one at a time.
#[derive(Debug, Clone)]
pub struct DialogHistory {
    messages: Vec<Message>,
    limit: usize,
}

impl DialogHistory {
    pub fn new(system_prompt: Option<&str>, limit: usize) -> Self {
        let messages = system_prompt
            .filter(|p| !p.trim().is_empty())
            .map(|p| vec![Message::system(p)])
            .unwrap_or_default();
        Self {
            messages,
            limit: limit.max(2),
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Message::user(text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(Message::assistant(text));
    }

    fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.trim();
    }

    fn trim(&mut self) {
        let first = usize::from(self.has_system());
        while self.messages.len() > self.limit && self.messages.len() > first {
            let end = self.oldest_exchange_end(first);
            self.messages.drain(first..end);
        }
    }

    /// Exclusive end of the oldest exchange starting at `first`
    fn oldest_exchange_end(&self, first: usize) -> usize {
        let rest = &self.messages[first..];
        let Some(user) = rest.iter().position(|m| m.role == Role::User) else {
            return first + 1;
        };
        rest[user..]
            .iter()
            .position(|m| m.role == Role::Assistant)
            .map(|reply| first + user + reply + 1)
            .unwrap_or(first + user + 1)
    }

    fn has_system(&self) -> bool {
        self.messages
            .first()
            .map(|m| m.role == Role::System)
            .unwrap_or(false)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Owned copy for a generation request
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

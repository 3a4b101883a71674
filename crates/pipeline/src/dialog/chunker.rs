//! Sentence chunker for streaming generator output
//!
//! Buffers token deltas and cuts a chunk at every `.`, `!` or `?` that is
//! followed by whitespace. Closing quotes and brackets stay with the
//! sentence they close. A terminator at the very end of the buffer is held
//! back until the next delta shows what follows it, so "3.5" or "e.g."
//! mid-token are not split.

const TERMINATORS: &[char] = &['.', '!', '?'];
const CLOSERS: &[char] = &['"', '\'', ')', ']', '\u{201D}', '\u{2019}'];

/// Accumulates deltas and yields complete sentences
#[derive(Debug, Default)]
pub struct SentenceChunker {
    buffer: String,
}

impl SentenceChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return any sentences it completed
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let (sentences, rest) = find_sentences(&self.buffer);
        self.buffer = rest;
        sentences
    }

    /// Remaining text at end of stream, if any
    pub fn flush(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.buffer);
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }

    /// Text not yet emitted
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Split `text` at sentence boundaries.
/// Returns (sentences, remaining_text)
fn find_sentences(text: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut current = String::new();

    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        i += 1;

        if !TERMINATORS.contains(&c) {
            continue;
        }

        // Swallow closing quotes and brackets
        let mut end = i;
        while end < chars.len() && CLOSERS.contains(&chars[end]) {
            end += 1;
        }

        match chars.get(end) {
            Some(next) if next.is_whitespace() => {
                current.extend(&chars[i..end]);
                i = end + 1;
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
            }
            // End of buffer: wait for more text
            None => {
                current.extend(&chars[i..end]);
                i = end;
            }
            Some(_) => {}
        }
    }

    (sentences, current)
}

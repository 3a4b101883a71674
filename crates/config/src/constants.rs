//! Centralized constants for the call orchestrator
//!
//! Single source of truth for default values. Config structs use these for
//! their serde defaults; nothing else should hardcode them.

/// Telephony audio
pub mod audio {
    /// Narrowband telephony rate
    pub const SAMPLE_RATE_HZ: u32 = 8000;

    /// Duration of one transport frame
    pub const FRAME_MS: u32 = 20;
}

/// End-of-utterance detection
pub mod endpointing {
    /// Silence after the last interim text before the utterance is final
    pub const SILENCE_MS: u64 = 180;

    /// Shorter delay used when the text already looks complete
    pub const SEMANTIC_MS: u64 = 150;

    /// Typical slack when a deployment wants one; `silence_grace_ms` defaults to 0
    pub const SILENCE_GRACE_MS: u64 = 50;

    /// Utterances shorter than this are never forwarded
    pub const MIN_UTTERANCE_CHARS: usize = 2;

    /// Words needed before a question-starter counts as complete
    pub const MIN_QUESTION_WORDS: usize = 3;

    /// Short replies that are complete on their own
    pub const COMPLETE_PHRASES: &[&str] = &[
        "hello",
        "hi",
        "hey",
        "yes",
        "no",
        "yeah",
        "nope",
        "okay",
        "ok",
        "sure",
        "thanks",
        "thank you",
        "bye",
        "goodbye",
        "please",
        "i see",
        "got it",
        "sounds good",
        "that works",
        "perfect",
    ];

    /// First words that mark a question
    pub const QUESTION_STARTERS: &[&str] = &[
        "who", "what", "when", "where", "why", "how", "can", "do", "does", "is", "are", "will",
        "would",
    ];
}

/// Barge-in confirmation
pub mod barge_in {
    /// VAD confidence a frame must exceed
    pub const CONFIDENCE: f32 = 0.6;

    /// Consecutive confident frames needed to confirm
    pub const CONSECUTIVE_FRAMES: u32 = 3;
}

/// NLMS echo canceller (signals normalized to [-1, 1])
pub mod echo {
    /// Adaptive filter length in samples (64ms at 8kHz)
    pub const TAPS: usize = 512;

    /// Normalized step size
    pub const STEP_SIZE: f32 = 0.1;

    /// Regularization added to the reference power
    pub const DELTA: f32 = 0.01;

    /// Input power above this fraction of reference power means double-talk
    pub const DOUBLE_TALK_RATIO: f32 = 0.5;

    /// Frames adaptation stays frozen after double-talk ends
    pub const HANGOVER_FRAMES: u32 = 10;

    /// Outbound frames kept as echo reference (200ms)
    pub const REFERENCE_FRAMES: usize = 10;
}

/// Voice activity detection
pub mod vad {
    pub const SPEECH_THRESHOLD: f32 = 0.5;
    pub const SILENCE_THRESHOLD: f32 = 0.35;

    /// Thresholds for noisy lines
    pub const AGGRESSIVE_SPEECH_THRESHOLD: f32 = 0.3;
    pub const AGGRESSIVE_SILENCE_THRESHOLD: f32 = 0.2;

    /// Weight of the previous smoothed probability
    pub const SMOOTHING: f32 = 0.8;

    /// Rolling context window, in frames
    pub const CONTEXT_FRAMES: usize = 50;

    pub const MIN_SPEECH_MS: u32 = 100;
    pub const MIN_SILENCE_MS: u32 = 200;

    /// Frame energy mapped to probability 0.0
    pub const ENERGY_FLOOR_DB: f32 = -50.0;

    /// Frame energy mapped to probability 1.0
    pub const ENERGY_CEILING_DB: f32 = -20.0;
}

/// Dialog engine
pub mod dialog {
    /// Messages kept in history, system entry included
    pub const HISTORY_LIMIT: usize = 20;

    /// Spoken when a turn cannot be answered
    pub const FALLBACK_LINE: &str = "Sorry, could you repeat that?";

    pub const MAX_TOKENS: u32 = 200;
    pub const TEMPERATURE: f32 = 0.9;

    /// Capacity of the chunk channel between generation and synthesis
    pub const CHUNK_QUEUE: usize = 16;
}

/// Synthesis playback
pub mod synthesis {
    /// Natural pause inserted between chunks
    pub const CHUNK_PAUSE_MS: u64 = 100;

    /// Frames sent ahead of real time to absorb jitter
    pub const PREBUFFER_FRAMES: u32 = 2;
}

/// Timeouts
pub mod timeouts {
    /// Wait for cancelled workers before aborting them
    pub const CANCEL_JOIN_MS: u64 = 500;

    /// Opening a stream to any external service
    pub const CONNECT_MS: u64 = 5000;
}

/// Connection retry
pub mod retry {
    pub const MAX_RETRIES: u32 = 1;
    pub const BACKOFF_MS: u64 = 200;
}

/// Service endpoints
pub mod endpoints {
    pub const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";
    pub const DEEPGRAM_SPEAK_URL: &str = "https://api.deepgram.com/v1/speak";
    pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
}

/// Default service models
pub mod models {
    pub const RECOGNIZER: &str = "nova-2";
    pub const SYNTHESIZER_VOICE: &str = "aura-2-thalia-en";
    pub const GENERATOR: &str = "llama-3.3-70b-versatile";
}

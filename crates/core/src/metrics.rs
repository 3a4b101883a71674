//! Per-turn latency metrics and the turn record handed to observability

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Stage timestamps for the current turn plus the call-wide barge-in count.
///
/// Uses tokio's clock so paused-time tests observe exact deltas.
#[derive(Debug, Clone, Default)]
pub struct ConversationMetrics {
    pub turn_start: Option<Instant>,
    pub first_interim: Option<Instant>,
    pub final_transcript: Option<Instant>,
    pub first_token: Option<Instant>,
    pub first_audio: Option<Instant>,
    pub turn_end: Option<Instant>,
    /// Not reset between turns
    pub barge_in_count: u32,
}

impl ConversationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all per-turn timestamps
    pub fn reset_turn(&mut self) {
        self.turn_start = None;
        self.first_interim = None;
        self.final_transcript = None;
        self.first_token = None;
        self.first_audio = None;
        self.turn_end = None;
    }

    /// Start the turn clock if it is not already running
    pub fn mark_turn_start(&mut self) {
        self.turn_start.get_or_insert_with(Instant::now);
    }

    pub fn mark_first_interim(&mut self) {
        self.mark_turn_start();
        self.first_interim.get_or_insert_with(Instant::now);
    }

    pub fn mark_final_transcript(&mut self) {
        self.mark_turn_start();
        self.final_transcript.get_or_insert_with(Instant::now);
    }

    pub fn mark_first_token(&mut self) {
        self.first_token.get_or_insert_with(Instant::now);
    }

    pub fn mark_first_audio(&mut self) {
        self.first_audio.get_or_insert_with(Instant::now);
    }

    pub fn mark_turn_end(&mut self) {
        self.turn_end = Some(Instant::now());
    }

    pub fn record_barge_in(&mut self) {
        self.barge_in_count += 1;
    }

    /// Millisecond offsets of every stage from the turn start
    pub fn snapshot(&self) -> MetricsSnapshot {
        let offset = |t: Option<Instant>| match (self.turn_start, t) {
            (Some(start), Some(t)) => Some(t.saturating_duration_since(start).as_millis() as u64),
            _ => None,
        };
        MetricsSnapshot {
            first_interim_ms: offset(self.first_interim),
            final_transcript_ms: offset(self.final_transcript),
            first_token_ms: offset(self.first_token),
            first_audio_ms: offset(self.first_audio),
            turn_end_ms: offset(self.turn_end),
            barge_in_count: self.barge_in_count,
        }
    }

    /// Stage deltas for a finished turn.
    ///
    /// `None` until both the turn start and turn end are known.
    pub fn summary(&self) -> Option<TurnSummary> {
        let start = self.turn_start?;
        let end = self.turn_end?;
        let delta = |from: Option<Instant>, to: Option<Instant>| match (from, to) {
            (Some(from), Some(to)) => Some(to.saturating_duration_since(from).as_millis() as u64),
            _ => None,
        };
        Some(TurnSummary {
            total_ms: end.saturating_duration_since(start).as_millis() as u64,
            stt_ms: delta(Some(start), self.final_transcript),
            llm_ttft_ms: delta(self.final_transcript, self.first_token),
            tts_ttfb_ms: delta(self.first_token, self.first_audio),
        })
    }
}

/// Stage offsets (ms from turn start)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub first_interim_ms: Option<u64>,
    pub final_transcript_ms: Option<u64>,
    pub first_token_ms: Option<u64>,
    pub first_audio_ms: Option<u64>,
    pub turn_end_ms: Option<u64>,
    pub barge_in_count: u32,
}

/// Elapsed time between stages of one turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSummary {
    pub total_ms: u64,
    /// Turn start to final transcript
    pub stt_ms: Option<u64>,
    /// Final transcript to first generated token
    pub llm_ttft_ms: Option<u64>,
    /// First token to first synthesized audio byte
    pub tts_ttfb_ms: Option<u64>,
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Response played to completion
    Completed,
    /// Cancelled by barge-in
    Interrupted,
    /// Fallback line was spoken
    Fallback,
    /// Mid-stream failure, partial output discarded
    Failed,
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnOutcome::Completed => "completed",
            TurnOutcome::Interrupted => "interrupted",
            TurnOutcome::Fallback => "fallback",
            TurnOutcome::Failed => "failed",
        }
    }
}

/// Structured record emitted once per turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub call_id: String,
    pub stream_id: String,
    /// 1-based turn number within the call
    pub turn: u64,
    pub outcome: TurnOutcome,
    pub metrics: MetricsSnapshot,
    pub summary: Option<TurnSummary>,
    pub barge_in_count: u32,
    pub recorded_at: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(
        call_id: impl Into<String>,
        stream_id: impl Into<String>,
        turn: u64,
        outcome: TurnOutcome,
        metrics: &ConversationMetrics,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            stream_id: stream_id.into(),
            turn,
            outcome,
            metrics: metrics.snapshot(),
            summary: metrics.summary(),
            barge_in_count: metrics.barge_in_count,
            recorded_at: Utc::now(),
        }
    }
}

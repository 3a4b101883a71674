//! Per-call conversation context
//!
//! Owned by the call session task; no other worker touches it.

use voxcall_core::{
    ConversationMetrics, ConversationState, DialogHistory, TurnOutcome, TurnRecord,
};

use crate::endpointer::Endpointer;

pub struct ConversationContext {
    pub call_id: String,
    pub stream_id: String,
    state: ConversationState,
    pub history: DialogHistory,
    pub metrics: ConversationMetrics,
    pub endpointer: Endpointer,
    /// User turns finalized so far
    turns: u64,
}

impl ConversationContext {
    pub fn new(
        call_id: impl Into<String>,
        stream_id: impl Into<String>,
        history: DialogHistory,
        endpointer: Endpointer,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            stream_id: stream_id.into(),
            state: ConversationState::Listening,
            history,
            metrics: ConversationMetrics::new(),
            endpointer,
            turns: 0,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Move to `to`, logging the transition with the metrics snapshot.
    ///
    /// Returns false and leaves the state alone if the move is not allowed.
    /// Entering `Listening` clears the per-turn metrics.
    pub fn transition(&mut self, to: ConversationState) -> bool {
        let from = self.state;
        if !from.can_transition_to(to) {
            tracing::warn!(call_id = %self.call_id, from = ?from, to = ?to, "Invalid state transition");
            return false;
        }

        self.state = to;
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            call_id = %self.call_id,
            from = ?from,
            to = ?to,
            turn = self.turns,
            first_interim_ms = ?snapshot.first_interim_ms,
            final_transcript_ms = ?snapshot.final_transcript_ms,
            first_token_ms = ?snapshot.first_token_ms,
            first_audio_ms = ?snapshot.first_audio_ms,
            turn_end_ms = ?snapshot.turn_end_ms,
            barge_ins = snapshot.barge_in_count,
            "State transition"
        );

        if to == ConversationState::Listening {
            self.metrics.reset_turn();
        }
        true
    }

    /// Count a newly finalized user utterance; returns its turn number
    pub fn begin_user_turn(&mut self) -> u64 {
        self.turns += 1;
        self.turns
    }

    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Close the current turn and build its record
    pub fn finish_turn(&mut self, outcome: TurnOutcome) -> TurnRecord {
        self.metrics.mark_turn_end();
        let record = TurnRecord::new(
            self.call_id.as_str(),
            self.stream_id.as_str(),
            self.turns,
            outcome,
            &self.metrics,
        );

        let summary = record.summary.unwrap_or_default();
        tracing::info!(
            call_id = %self.call_id,
            turn = record.turn,
            outcome = outcome.as_str(),
            total_ms = summary.total_ms,
            stt_ms = ?summary.stt_ms,
            llm_ttft_ms = ?summary.llm_ttft_ms,
            tts_ttfb_ms = ?summary.tts_ttfb_ms,
            "Turn summary"
        );
        record
    }
}

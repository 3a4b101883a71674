//! Turn record export

use crate::TurnRecord;

/// Receives one structured record per finished turn
pub trait TurnRecordSink: Send + Sync + 'static {
    fn record(&self, record: &TurnRecord);
}

/// Sink that drops every record
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTurnSink;

impl TurnRecordSink for NoopTurnSink {
    fn record(&self, _record: &TurnRecord) {}
}

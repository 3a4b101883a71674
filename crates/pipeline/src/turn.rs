//! Speaking jobs and the events their workers report
//!
//! A job is one thing the agent says: a generated reply, the greeting or
//! the fallback line. Each job owns a cancellation token and at most one
//! generation and one playback task. Events are tagged with the job id so
//! the session can drop reports from a job it already abandoned.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voxcall_core::Error;

/// Identifier of one speaking job within a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a job speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Generated answer to a user utterance
    Reply,
    /// Configured opening line
    Greeting,
    /// Canned apology after a failed turn
    Fallback,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Reply => "reply",
            JobKind::Greeting => "greeting",
            JobKind::Fallback => "fallback",
        }
    }
}

/// Progress reported by job workers
#[derive(Debug)]
pub enum TurnEvent {
    FirstToken(JobId),
    /// First speakable chunk was handed to synthesis
    FirstChunk(JobId),
    /// First synthesized audio bytes arrived
    FirstAudio(JobId),
    /// Generation finished; `response` is the spoken chunks joined
    GenerationDone { job: JobId, response: String },
    GenerationFailed { job: JobId, error: Error },
    /// Every chunk was played
    PlaybackDone(JobId),
    PlaybackFailed { job: JobId, error: Error },
}

impl TurnEvent {
    pub fn job(&self) -> JobId {
        match self {
            TurnEvent::FirstToken(job)
            | TurnEvent::FirstChunk(job)
            | TurnEvent::FirstAudio(job)
            | TurnEvent::PlaybackDone(job) => *job,
            TurnEvent::GenerationDone { job, .. }
            | TurnEvent::GenerationFailed { job, .. }
            | TurnEvent::PlaybackFailed { job, .. } => *job,
        }
    }
}

/// The job currently owned by the session
#[derive(Debug)]
pub struct ActiveJob {
    pub id: JobId,
    pub kind: JobKind,
    pub cancel: CancellationToken,
    generation: Option<JoinHandle<()>>,
    playback: Option<JoinHandle<()>>,
    /// Set once generation completes
    pub response: Option<String>,
}

impl ActiveJob {
    pub fn new(
        id: JobId,
        kind: JobKind,
        cancel: CancellationToken,
        generation: Option<JoinHandle<()>>,
        playback: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            kind,
            cancel,
            generation,
            playback: Some(playback),
            response: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel both workers and wait for them to stop.
    ///
    /// A worker that has not stopped within `join_timeout` is aborted.
    pub async fn cancel_and_join(mut self, join_timeout: Duration) {
        self.cancel.cancel();
        for handle in [self.generation.take(), self.playback.take()]
            .into_iter()
            .flatten()
        {
            join_or_abort(handle, join_timeout, self.id).await;
        }
    }

    /// Wait for workers that already reported completion
    pub async fn join(mut self, join_timeout: Duration) {
        for handle in [self.generation.take(), self.playback.take()]
            .into_iter()
            .flatten()
        {
            join_or_abort(handle, join_timeout, self.id).await;
        }
    }
}

async fn join_or_abort(mut handle: JoinHandle<()>, join_timeout: Duration, job: JobId) {
    match tokio::time::timeout(join_timeout, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_cancelled() => {}
        Ok(Err(e)) => tracing::error!(job = %job, error = %e, "Job worker panicked"),
        Err(_) => {
            tracing::warn!(job = %job, "Job worker did not stop in time, aborting");
            handle.abort();
        }
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.cancel.cancel();
        for handle in [self.generation.take(), self.playback.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

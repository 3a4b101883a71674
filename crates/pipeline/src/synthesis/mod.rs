//! Speech synthesis adapter and playback
//!
//! Each chunk is synthesized on its own stream, re-framed to fixed frames
//! and released to the sink at playback pace. Chunks are played strictly in
//! the order they arrive. The next chunk's stream is opened and buffered
//! while the current one plays. Every outbound frame is also offered to the
//! echo reference channel.

mod pacer;

pub use pacer::{FrameAssembler, PlaybackPacer};

use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use voxcall_config::SynthesisConfig;
use voxcall_core::{
    AudioFormat, AudioFrame, AudioSink, Error, Result, Service, SpeechChunk, SynthesizeStream,
};

use crate::retry::RetryPolicy;
use crate::turn::{JobId, TurnEvent};

/// Provider audio pieces buffered ahead of playback, per chunk
const PREFETCH_QUEUE: usize = 64;

/// A chunk whose synthesis stream is already open
struct Prepared {
    chunk: SpeechChunk,
    audio: Result<mpsc::Receiver<Result<Vec<u8>>>>,
}

/// Turns speech chunks into paced outbound audio
pub struct SpeechPlayer {
    tts: Arc<dyn SynthesizeStream>,
    sink: Arc<dyn AudioSink>,
    config: SynthesisConfig,
    retry: RetryPolicy,
    /// Copy of outbound frames for the echo canceller
    reference_tx: Option<mpsc::Sender<AudioFrame>>,
    sequence: AtomicU64,
}

impl SpeechPlayer {
    pub fn new(
        tts: Arc<dyn SynthesizeStream>,
        sink: Arc<dyn AudioSink>,
        config: SynthesisConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tts,
            sink,
            config,
            retry,
            reference_tx: None,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_reference(mut self, reference_tx: mpsc::Sender<AudioFrame>) -> Self {
        self.reference_tx = Some(reference_tx);
        self
    }

    pub fn format(&self) -> AudioFormat {
        self.tts.output_format()
    }

    /// Playback worker body.
    ///
    /// Plays chunks until `chunks` closes, then reports `PlaybackDone`.
    /// Returns quietly once `cancel` fires.
    pub async fn play(
        self: Arc<Self>,
        job: JobId,
        chunks: mpsc::Receiver<SpeechChunk>,
        events: mpsc::Sender<TurnEvent>,
        cancel: CancellationToken,
    ) {
        let (ready_tx, ready_rx) = mpsc::channel(1);
        let prefetch_cancel = cancel.child_token();

        let playback = async {
            self.playback(job, ready_rx, &events, &cancel).await;
            prefetch_cancel.cancel();
        };
        tokio::join!(self.prefetch(job, chunks, ready_tx, prefetch_cancel.clone()), playback);
    }

    /// Opens each chunk's synthesis stream in order and buffers its audio.
    ///
    /// Hands a chunk over as soon as its stream is open, so the next one is
    /// already fetching while playback works through the current one.
    async fn prefetch(
        &self,
        job: JobId,
        mut chunks: mpsc::Receiver<SpeechChunk>,
        ready: mpsc::Sender<Prepared>,
        cancel: CancellationToken,
    ) {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                chunk = chunks.recv() => chunk,
            };
            let Some(chunk) = chunk else { return };
            tracing::debug!(job = %job, index = chunk.index, text = %chunk.text, "Synthesizing chunk");

            let opened = self
                .retry
                .connect(Service::Synthesizer, &cancel, || {
                    self.tts.synthesize(&chunk.text, cancel.child_token())
                })
                .await;
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready.send(Prepared { chunk, audio: Err(e) }).await;
                    return;
                }
            };

            let (audio_tx, audio_rx) = mpsc::channel(PREFETCH_QUEUE);
            if ready.send(Prepared { chunk, audio: Ok(audio_rx) }).await.is_err() {
                return;
            }
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    item = stream.next() => item,
                };
                let Some(item) = item else { break };
                let failed = item.is_err();
                if audio_tx.send(item).await.is_err() || failed {
                    return;
                }
            }
        }
    }

    async fn playback(
        &self,
        job: JobId,
        mut ready: mpsc::Receiver<Prepared>,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) {
        let frame = Duration::from_millis(self.config.frame_ms as u64);
        let mut pacer = PlaybackPacer::new(frame, self.config.prebuffer_frames);
        let mut first_audio = true;

        loop {
            let prepared = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                prepared = ready.recv() => prepared,
            };
            let Some(Prepared { chunk, audio }) = prepared else { break };

            if chunk.index > 0 && self.config.chunk_pause_ms > 0 {
                let gap = Duration::from_millis(self.config.chunk_pause_ms);
                if !pacer.pause(gap, cancel).await {
                    return;
                }
            }

            let result = match audio {
                Ok(audio) => {
                    self.play_chunk(job, audio, &mut pacer, &mut first_audio, events, cancel)
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(frames) => {
                    tracing::debug!(job = %job, index = chunk.index, frames, "Chunk played");
                }
                Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                    tracing::debug!(job = %job, "Playback cancelled");
                    return;
                }
                Err(error) => {
                    tracing::warn!(job = %job, index = chunk.index, error = %error, "Playback failed");
                    let _ = events.send(TurnEvent::PlaybackFailed { job, error }).await;
                    return;
                }
            }
        }

        let _ = events.send(TurnEvent::PlaybackDone(job)).await;
    }

    async fn play_chunk(
        &self,
        job: JobId,
        mut audio: mpsc::Receiver<Result<Vec<u8>>>,
        pacer: &mut PlaybackPacer,
        first_audio: &mut bool,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let format = self.format();
        let mut assembler = FrameAssembler::new(format, self.config.frame_ms);
        let mut frames = 0;

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                item = audio.recv() => item,
            };
            let bytes = match item {
                None => break,
                Some(bytes) => bytes?,
            };
            if bytes.is_empty() {
                continue;
            }
            if *first_audio {
                *first_audio = false;
                let _ = events.send(TurnEvent::FirstAudio(job)).await;
            }
            for payload in assembler.push(&bytes) {
                self.send(payload, format, pacer, cancel).await?;
                frames += 1;
            }
        }

        if let Some(tail) = assembler.finish() {
            self.send(tail, format, pacer, cancel).await?;
            frames += 1;
        }
        Ok(frames)
    }

    async fn send(
        &self,
        payload: Vec<u8>,
        format: AudioFormat,
        pacer: &mut PlaybackPacer,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !pacer.pace(cancel).await {
            return Err(Error::Cancelled);
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let frame = AudioFrame::new(payload, format, sequence);

        if let Some(reference) = &self.reference_tx {
            // Reference is best effort; never stall playback for it
            let _ = reference.try_send(frame.clone());
        }
        self.sink.send_frame(frame).await
    }
}

/// Chunk channel pre-loaded with one fixed line
pub fn single_line(job: JobId, text: &str) -> mpsc::Receiver<SpeechChunk> {
    let (tx, rx) = mpsc::channel(1);
    // Capacity 1 and a fresh channel: cannot fail
    let _ = tx.try_send(SpeechChunk::new(text.trim(), 0, job.0));
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use parking_lot::Mutex;
    use voxcall_core::AudioByteStream;

    struct ToneSynth {
        /// Bytes per provider chunk
        piece: usize,
        /// Total bytes per request
        total: usize,
        /// Delay before the first byte of every request
        first_byte: Duration,
    }

    impl ToneSynth {
        fn new(piece: usize, total: usize) -> Self {
            Self {
                piece,
                total,
                first_byte: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl SynthesizeStream for ToneSynth {
        async fn synthesize(
            &self,
            text: &str,
            _cancel: CancellationToken,
        ) -> Result<AudioByteStream> {
            let marker = text.len() as u8;
            let pieces: Vec<Result<Vec<u8>>> = (0..self.total)
                .step_by(self.piece)
                .map(|start| Ok(vec![marker; self.piece.min(self.total - start)]))
                .collect();
            let first_byte = self.first_byte;
            let lead = stream::once(async move {
                tokio::time::sleep(first_byte).await;
                Ok(Vec::new())
            });
            Ok(Box::pin(lead.chain(stream::iter(pieces))))
        }

        fn output_format(&self) -> AudioFormat {
            AudioFormat::telephony()
        }

        fn provider_name(&self) -> &str {
            "tone"
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<(tokio::time::Instant, AudioFrame)>>,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn send_frame(&self, frame: AudioFrame) -> Result<()> {
            self.frames.lock().push((tokio::time::Instant::now(), frame));
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    fn player(sink: Arc<RecordingSink>, total: usize) -> Arc<SpeechPlayer> {
        Arc::new(SpeechPlayer::new(
            Arc::new(ToneSynth::new(100, total)),
            sink,
            SynthesisConfig::default(),
            RetryPolicy::none(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_play_in_order_at_pace() {
        let sink = Arc::new(RecordingSink::default());
        let player = player(sink.clone(), 800);
        let (chunk_tx, chunk_rx) = mpsc::channel(4);
        let (event_tx, mut event_rx) = mpsc::channel(16);

        chunk_tx.send(SpeechChunk::new("Hi.", 0, 1)).await.unwrap();
        chunk_tx.send(SpeechChunk::new("Bye now.", 1, 1)).await.unwrap();
        drop(chunk_tx);

        let start = tokio::time::Instant::now();
        player
            .play(JobId(1), chunk_rx, event_tx, CancellationToken::new())
            .await;

        let frames = sink.frames.lock();
        // 800 bytes = 5 frames per chunk
        assert_eq!(frames.len(), 10);
        assert!(frames[..5].iter().all(|(_, f)| f.payload[0] == 3));
        assert!(frames[5..].iter().all(|(_, f)| f.payload[0] == 8));
        let sequences: Vec<u64> = frames.iter().map(|(_, f)| f.sequence).collect();
        assert_eq!(sequences, (0..10).collect::<Vec<_>>());

        // Second chunk starts after the first finished playing plus the pause
        let second = frames[5].0 - start;
        assert_eq!(second, Duration::from_millis(200));
        drop(frames);

        assert!(matches!(event_rx.recv().await, Some(TurnEvent::FirstAudio(JobId(1)))));
        assert!(matches!(event_rx.recv().await, Some(TurnEvent::PlaybackDone(JobId(1)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_chunk_synthesizes_during_playback() {
        let sink = Arc::new(RecordingSink::default());
        let player = Arc::new(SpeechPlayer::new(
            Arc::new(ToneSynth {
                first_byte: Duration::from_millis(150),
                ..ToneSynth::new(100, 800)
            }),
            sink.clone(),
            SynthesisConfig::default(),
            RetryPolicy::none(),
        ));
        let (chunk_tx, chunk_rx) = mpsc::channel(4);
        let (event_tx, _event_rx) = mpsc::channel(16);

        chunk_tx.send(SpeechChunk::new("Hi.", 0, 1)).await.unwrap();
        chunk_tx.send(SpeechChunk::new("Bye now.", 1, 1)).await.unwrap();
        drop(chunk_tx);

        let start = tokio::time::Instant::now();
        player
            .play(JobId(4), chunk_rx, event_tx, CancellationToken::new())
            .await;

        let frames = sink.frames.lock();
        assert_eq!(frames.len(), 10);
        assert!(frames[5..].iter().all(|(_, f)| f.payload[0] == 8));
        assert_eq!(frames[0].0 - start, Duration::from_millis(150));
        // Only the first chunk waits for its first byte; the second starts
        // right after the pause, as with an instant synthesizer
        assert_eq!(frames[5].0 - frames[0].0, Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_playback_within_a_frame() {
        let sink = Arc::new(RecordingSink::default());
        let player = player(sink.clone(), 16_000);
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(player.play(
            JobId(2),
            single_line(JobId(2), "A long sentence."),
            event_tx,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(105)).await;
        cancel.cancel();
        let cancelled_at = tokio::time::Instant::now();
        task.await.unwrap();

        let frames = sink.frames.lock();
        let last = frames.last().map(|(t, _)| *t).unwrap();
        assert!(last <= cancelled_at);
        assert!(frames.len() < 100);
        drop(frames);

        // No completion report after cancellation
        while let Ok(event) = event_rx.try_recv() {
            assert!(!matches!(event, TurnEvent::PlaybackDone(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_copy_of_outbound_frames() {
        let sink = Arc::new(RecordingSink::default());
        let (reference_tx, mut reference_rx) = mpsc::channel(64);
        let player = Arc::new(
            SpeechPlayer::new(
                Arc::new(ToneSynth::new(160, 320)),
                sink.clone(),
                SynthesisConfig::default(),
                RetryPolicy::none(),
            )
            .with_reference(reference_tx),
        );
        let (event_tx, _event_rx) = mpsc::channel(16);

        player
            .play(JobId(3), single_line(JobId(3), "Ok."), event_tx, CancellationToken::new())
            .await;

        assert_eq!(reference_rx.recv().await.map(|f| f.sequence), Some(0));
        assert_eq!(reference_rx.recv().await.map(|f| f.sequence), Some(1));
        assert!(reference_rx.try_recv().is_err());
    }
}

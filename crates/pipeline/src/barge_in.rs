//! Barge-in monitor
//!
//! Runs on every inbound frame: echo cancellation against the latest
//! outbound reference, then VAD on the residual. While the agent is
//! speaking, confident speech frames feed a debounce counter; once it
//! reaches the configured count a single barge-in signal is raised.

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use voxcall_config::{BargeInConfig, EchoConfig, VadConfig};
use voxcall_core::AudioFrame;

use crate::echo::{EchoCanceller, ReferenceRing};
use crate::vad::{VadResult, VoiceActivityDetector};

/// Confirmed user speech during agent playback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BargeInSignal {
    pub confidence: f32,
    /// Consecutive confident frames at confirmation
    pub frames: u32,
}

/// Debounce over per-frame VAD results
#[derive(Debug, Clone)]
pub struct BargeInDetector {
    confidence_threshold: f32,
    required: u32,
    consecutive: u32,
}

impl BargeInDetector {
    pub fn new(config: &BargeInConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            required: config.consecutive_frames.max(1),
            consecutive: 0,
        }
    }

    /// Feed one frame; returns true when a barge-in is confirmed
    pub fn update(&mut self, result: &VadResult) -> bool {
        if result.speech_detected && result.confidence > self.confidence_threshold {
            self.consecutive += 1;
            self.consecutive >= self.required
        } else {
            // Decay instead of reset so a single dip does not restart the count
            self.consecutive = self.consecutive.saturating_sub(1);
            false
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Per-call monitor worker
pub struct BargeInMonitor {
    echo: Option<EchoCanceller>,
    references: ReferenceRing,
    vad: VoiceActivityDetector,
    detector: BargeInDetector,
}

impl BargeInMonitor {
    pub fn new(barge_in: &BargeInConfig, echo: &EchoConfig, vad: &VadConfig) -> Self {
        Self {
            echo: echo.enabled.then(|| EchoCanceller::new(echo)),
            references: ReferenceRing::new(echo.reference_frames),
            vad: VoiceActivityDetector::energy(vad),
            detector: BargeInDetector::new(barge_in),
        }
    }

    pub fn with_vad(mut self, vad: VoiceActivityDetector) -> Self {
        self.vad = vad;
        self
    }

    /// Record an outbound frame as echo reference
    pub fn push_reference(&mut self, frame: AudioFrame) {
        self.references.push(frame);
    }

    /// Process one inbound frame.
    ///
    /// Debouncing only runs while `speaking`; VAD state is kept current
    /// either way.
    pub fn process(&mut self, frame: &AudioFrame, speaking: bool) -> Option<BargeInSignal> {
        let cleaned = match self.echo.as_mut() {
            Some(aec) if speaking => aec.process(frame, self.references.latest()),
            _ => frame.clone(),
        };
        let result = self.vad.process_frame(&cleaned);

        if !speaking {
            return None;
        }
        if self.detector.update(&result) {
            let frames = self.detector.consecutive();
            self.detector.reset();
            return Some(BargeInSignal {
                confidence: result.confidence,
                frames,
            });
        }
        None
    }

    /// Worker body: consume inbound and reference frames until cancelled.
    ///
    /// At most one signal is sent per speaking period.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<AudioFrame>,
        mut references: mpsc::Receiver<AudioFrame>,
        mut speaking: watch::Receiver<bool>,
        signals: mpsc::Sender<BargeInSignal>,
        cancel: CancellationToken,
    ) {
        let mut is_speaking = *speaking.borrow_and_update();
        let mut armed = is_speaking;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = speaking.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    is_speaking = *speaking.borrow_and_update();
                    armed = is_speaking;
                    self.detector.reset();
                    if !is_speaking {
                        self.references.clear();
                    }
                }
                Some(reference) = references.recv() => self.push_reference(reference),
                frame = inbound.recv() => {
                    let Some(frame) = frame else { break };
                    let Some(signal) = self.process(&frame, is_speaking && armed) else {
                        continue;
                    };
                    armed = false;
                    tracing::info!(
                        confidence = signal.confidence,
                        frames = signal.frames,
                        "Barge-in detected"
                    );
                    if signals.send(signal).await.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Barge-in monitor stopped");
    }
}

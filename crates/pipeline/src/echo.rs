//! NLMS acoustic echo canceller
//!
//! Estimates the echo path from outbound reference audio to the inbound
//! signal with a normalized least-mean-squares filter and subtracts the
//! estimate sample by sample. Adaptation freezes while double-talk is
//! suspected so the user's own voice does not corrupt the echo model.

use std::collections::VecDeque;
use voxcall_config::EchoConfig;
use voxcall_core::AudioFrame;

/// Per-call adaptive echo canceller
#[derive(Debug)]
pub struct EchoCanceller {
    weights: Vec<f32>,
    /// Most recent reference samples, newest first
    history: VecDeque<f32>,
    /// Running sum of squares over `history`
    history_energy: f32,
    step_size: f32,
    delta: f32,
    double_talk_ratio: f32,
    hangover_frames: u32,
    hangover: u32,
}

impl EchoCanceller {
    pub fn new(config: &EchoConfig) -> Self {
        let taps = config.taps.max(1);
        Self {
            weights: vec![0.0; taps],
            history: VecDeque::from(vec![0.0; taps]),
            history_energy: 0.0,
            step_size: config.step_size,
            delta: config.delta,
            double_talk_ratio: config.double_talk_ratio,
            hangover_frames: config.hangover_frames,
            hangover: 0,
        }
    }

    /// Cancel echo from `input` given the matching outbound `reference`.
    ///
    /// Without a reference the input passes through unchanged.
    pub fn process(&mut self, input: &AudioFrame, reference: Option<&AudioFrame>) -> AudioFrame {
        let Some(reference) = reference else {
            return input.clone();
        };
        let cleaned = self.cancel(&input.to_samples(), &reference.to_samples());
        AudioFrame::from_samples(&cleaned, input.format, input.sequence)
    }

    /// Sample-level cancellation. Missing reference samples count as silence.
    pub fn cancel(&mut self, input: &[f32], reference: &[f32]) -> Vec<f32> {
        let adapt = self.update_double_talk(input, reference);

        input
            .iter()
            .enumerate()
            .map(|(i, &desired)| {
                self.push_reference(reference.get(i).copied().unwrap_or(0.0));
                let estimate: f32 = self
                    .weights
                    .iter()
                    .zip(self.history.iter())
                    .map(|(w, x)| w * x)
                    .sum();
                let error = desired - estimate;

                if adapt {
                    let mu = self.step_size / (self.history_energy + self.delta);
                    for (w, x) in self.weights.iter_mut().zip(self.history.iter()) {
                        *w += mu * error * x;
                    }
                }
                error
            })
            .collect()
    }

    fn push_reference(&mut self, sample: f32) {
        if let Some(oldest) = self.history.pop_back() {
            self.history_energy -= oldest * oldest;
        }
        self.history.push_front(sample);
        self.history_energy = (self.history_energy + sample * sample).max(0.0);
    }

    /// Returns whether the filter may adapt on this frame
    fn update_double_talk(&mut self, input: &[f32], reference: &[f32]) -> bool {
        let input_power = mean_power(input);
        let reference_power = mean_power(reference);

        if reference_power <= f32::EPSILON {
            return false;
        }
        if input_power > self.double_talk_ratio * reference_power {
            if self.hangover == 0 {
                tracing::trace!(input_power, reference_power, "Double-talk suspected");
            }
            self.hangover = self.hangover_frames;
        } else {
            self.hangover = self.hangover.saturating_sub(1);
        }
        self.hangover == 0
    }

    pub fn is_frozen(&self) -> bool {
        self.hangover > 0
    }

    pub fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.history.iter_mut().for_each(|x| *x = 0.0);
        self.history_energy = 0.0;
        self.hangover = 0;
    }
}

fn mean_power(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32
}

/// Bounded ring of recent outbound frames
#[derive(Debug)]
pub struct ReferenceRing {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl ReferenceRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, frame: AudioFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn latest(&self) -> Option<&AudioFrame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

//! Silero speech probability
//!
//! The model runs on fixed windows (256 samples at 8 kHz, 512 at 16 kHz),
//! so 20 ms frames are buffered and the latest window's probability is
//! reported until the next window completes.

use voice_activity_detector::VoiceActivityDetector as SileroModel;
use voxcall_core::{Error, Result, SampleRate};

use super::SpeechScorer;

pub struct SileroScorer {
    model: SileroModel,
    window: usize,
    pending: Vec<f32>,
    last: f32,
}

impl SileroScorer {
    pub fn new(sample_rate: SampleRate) -> Result<Self> {
        let window = match sample_rate {
            SampleRate::Hz8000 => 256,
            SampleRate::Hz16000 => 512,
            other => {
                return Err(Error::Audio(format!(
                    "Silero VAD runs at 8 or 16 kHz, not {} Hz",
                    other.as_u32()
                )))
            }
        };

        let model = SileroModel::builder()
            .sample_rate(i64::from(sample_rate.as_u32()))
            .chunk_size(window)
            .build()
            .map_err(|e| Error::Audio(format!("Failed to load Silero VAD: {}", e)))?;

        tracing::debug!(sample_rate = sample_rate.as_u32(), window, "Silero VAD loaded");

        Ok(Self {
            model,
            window,
            pending: Vec::with_capacity(window * 2),
            last: 0.0,
        })
    }
}

impl SpeechScorer for SileroScorer {
    fn score(&mut self, samples: &[f32]) -> f32 {
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.window {
            let chunk: Vec<f32> = self.pending.drain(..self.window).collect();
            self.last = self.model.predict(chunk);
        }
        self.last
    }

    fn name(&self) -> &str {
        "silero"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_rate_is_rejected() {
        assert!(matches!(
            SileroScorer::new(SampleRate::Hz24000),
            Err(Error::Audio(_))
        ));
    }

    #[test]
    fn test_silence_scores_low() {
        let mut scorer = SileroScorer::new(SampleRate::Hz8000).unwrap();
        let mut probability = 0.0;
        for _ in 0..20 {
            probability = scorer.score(&[0.0; 160]);
        }
        assert!(probability < 0.5, "silence scored {}", probability);
    }

    #[test]
    fn test_holds_score_until_window_fills() {
        let mut scorer = SileroScorer::new(SampleRate::Hz8000).unwrap();
        // 160 samples do not fill a 256 sample window
        assert_eq!(scorer.score(&[0.0; 160]), 0.0);
        assert_eq!(scorer.pending.len(), 160);
        scorer.score(&[0.0; 160]);
        assert_eq!(scorer.pending.len(), 64);
    }
}

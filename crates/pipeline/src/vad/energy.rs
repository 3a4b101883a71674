//! Energy-based speech probability

use voxcall_core::audio::energy_db;

use super::SpeechScorer;

/// Maps frame RMS energy onto [0, 1] between a floor and a ceiling in dBFS
#[derive(Debug, Clone, Copy)]
pub struct EnergyScorer {
    floor_db: f32,
    ceiling_db: f32,
}

impl EnergyScorer {
    pub fn new(floor_db: f32, ceiling_db: f32) -> Self {
        // Keep the range non-empty
        let ceiling_db = ceiling_db.max(floor_db + 1.0);
        Self {
            floor_db,
            ceiling_db,
        }
    }
}

impl SpeechScorer for EnergyScorer {
    fn score(&mut self, samples: &[f32]) -> f32 {
        let db = energy_db(samples);
        ((db - self.floor_db) / (self.ceiling_db - self.floor_db)).clamp(0.0, 1.0)
    }

    fn name(&self) -> &str {
        "energy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_mapping() {
        let mut scorer = EnergyScorer::new(-50.0, -20.0);
        assert_eq!(scorer.score(&[0.0; 160]), 0.0);
        // Full-scale square wave is well above the ceiling
        assert_eq!(scorer.score(&[0.9; 160]), 1.0);

        // -35 dBFS sits halfway
        let amplitude = 10f32.powf(-35.0 / 20.0);
        let mid = scorer.score(&[amplitude; 160]);
        assert!((mid - 0.5).abs() < 0.01, "got {}", mid);
    }

    #[test]
    fn test_degenerate_range() {
        let mut scorer = EnergyScorer::new(-30.0, -40.0);
        let p = scorer.score(&[0.5; 160]);
        assert!((0.0..=1.0).contains(&p));
    }
}

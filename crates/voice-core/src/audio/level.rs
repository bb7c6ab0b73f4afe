//! Time-domain loudness estimation

use crate::config::MeterConfig;

const FULL_SCALE: f64 = 32768.0;

/// Turns a frame of PCM samples into a 0..1 loudness value
///
/// The value is the RMS of the samples normalized to full scale, multiplied
/// by `gain` and clamped, so normal speech fills most of the bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelAnalyzer {
    gain: f32,
}

impl LevelAnalyzer {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }

    pub fn from_config(config: &MeterConfig) -> Self {
        Self::new(config.gain)
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Root mean square of the samples in raw sample units
    pub fn rms(samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();

        ((sum_squares / samples.len() as f64).sqrt()) as f32
    }

    /// Loudness of one frame in 0..1
    pub fn level(&self, samples: &[i16]) -> f32 {
        let normalized = Self::rms(samples) as f64 / FULL_SCALE;
        ((normalized * self.gain as f64) as f32).clamp(0.0, 1.0)
    }
}

impl Default for LevelAnalyzer {
    fn default() -> Self {
        Self::from_config(&MeterConfig::default())
    }
}

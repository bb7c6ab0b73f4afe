//! Microphone capture abstraction

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::MeterConfig;
use crate::error::VoiceResult;

/// One block of mono 16-bit PCM captured from the microphone
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, timestamp_ms: u64) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp_ms,
        }
    }

    /// Frame of `len` zero samples
    pub fn silent(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0; len], sample_rate, 0)
    }

    /// Frame length in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// A microphone that can be opened and released
///
/// `start_capture` asks for permission and opens the device; it resolves
/// once permission is granted and fails when it is denied. Frames flow on
/// the returned channel until `stop_capture`, which must release the device
/// and be safe to call when nothing is open.
#[async_trait]
pub trait MicrophoneSource: Send + Sync + fmt::Debug {
    async fn start_capture(&self, config: &MeterConfig) -> VoiceResult<mpsc::Receiver<AudioFrame>>;

    async fn stop_capture(&self) -> VoiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        assert_eq!(AudioFrame::silent(160, 8000).duration_ms(), 20);
        assert_eq!(AudioFrame::silent(1024, 0).duration_ms(), 0);
    }
}

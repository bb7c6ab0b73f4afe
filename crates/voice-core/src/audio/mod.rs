//! Microphone level metering
//!
//! The operator console shows a live loudness bar while a call is being
//! connected or is connected. This module provides the pieces behind it:
//!
//! ```text
//! ┌─────────────────────┐    ┌─────────────────────┐    ┌─────────────────────┐
//! │  CallAudioMonitor   │    │  AudioLevelMeter    │    │  MicrophoneSource   │
//! │                     │    │                     │    │                     │
//! │ follows snapshot    │───▶│ start(on_level)     │───▶│ start_capture()     │
//! │ status.is_live()    │    │ stop()              │    │ stop_capture()      │
//! └─────────────────────┘    └─────────────────────┘    └─────────────────────┘
//!                                      │
//!                                      ▼
//!                            ┌─────────────────────┐
//!                            │  LevelAnalyzer      │
//!                            │  RMS × gain → 0..1  │
//!                            └─────────────────────┘
//! ```
//!
//! The microphone is a scoped resource: every successful `start_capture` is
//! paired with a `stop_capture` on every exit path (stop, permission denial,
//! teardown), and stopping cancels a permission request still in flight.

pub mod level;
pub mod meter;
pub mod monitor;
pub mod source;

pub use level::LevelAnalyzer;
pub use meter::{AudioLevelMeter, LevelCallback, MeterState, MicPermission};
pub use monitor::CallAudioMonitor;
pub use source::{AudioFrame, MicrophoneSource};

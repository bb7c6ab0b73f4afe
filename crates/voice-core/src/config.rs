//! Voice session configuration
//!
//! [`VoiceConfig`] carries the credential token, the best-effort command
//! policy, optional timeouts and the audio meter settings. It deserializes
//! from a partial document (every field has a default), so a settings file
//! only needs to name what it changes.
//!
//! ```rust
//! use callcenter_voice_core::config::{CommandFailurePolicy, VoiceConfig};
//! use std::time::Duration;
//!
//! let config = VoiceConfig::new()
//!     .with_token("eyJhbGciOi...")
//!     .with_failure_policy(CommandFailurePolicy::Warn)
//!     .with_registration_timeout(Duration::from_secs(10));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.registration_timeout(), Some(Duration::from_secs(10)));
//! assert_eq!(config.connect_timeout(), None);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VoiceError, VoiceResult};

/// What to do when a best-effort call command (reject, disconnect, mute) fails
///
/// Local state is never rolled back either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandFailurePolicy {
    /// Log the failure and publish a `CommandFailed` event only
    #[default]
    Silent,
    /// Additionally surface the failure as `warning` in the snapshot
    Warn,
}

/// Settings for the microphone level meter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Multiplier applied to the normalized RMS before clamping to 0..1
    pub gain: f32,
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Samples per analysis frame
    pub frame_size: usize,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            gain: 1.8,
            sample_rate: 8000,
            frame_size: 1024,
        }
    }
}

/// Configuration of one voice session controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Credential token handed to the telephony client
    pub token: String,
    /// Policy for failed best-effort call commands
    pub failure_policy: CommandFailurePolicy,
    /// Upper bound on `register()`; `None` waits indefinitely
    pub registration_timeout_ms: Option<u64>,
    /// Upper bound on `connect()`; `None` waits indefinitely
    pub connect_timeout_ms: Option<u64>,
    /// Capacity of the `VoiceEvent` broadcast channel
    pub event_capacity: usize,
    /// Max call events buffered for an outbound call before `connect` resolves
    pub early_event_limit: usize,
    /// Caller identifier used when an incoming call carries no `From`
    pub unknown_caller: String,
    /// Microphone meter settings
    pub meter: MeterConfig,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceConfig {
    /// Create a configuration with an empty token and no timeouts
    pub fn new() -> Self {
        Self {
            token: String::new(),
            failure_policy: CommandFailurePolicy::Silent,
            registration_timeout_ms: None,
            connect_timeout_ms: None,
            event_capacity: 256,
            early_event_limit: 32,
            unknown_caller: "Unknown".to_string(),
            meter: MeterConfig::default(),
        }
    }

    /// Set the credential token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Set the best-effort command failure policy
    pub fn with_failure_policy(mut self, policy: CommandFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Bound device registration
    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Bound the outbound connect command
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the notification channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Replace the meter settings
    pub fn with_meter(mut self, meter: MeterConfig) -> Self {
        self.meter = meter;
        self
    }

    pub fn registration_timeout(&self) -> Option<Duration> {
        self.registration_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Check internal consistency
    ///
    /// An empty token is *not* a validation failure: it is reported lazily
    /// by `initialize`/`start_call` so the UI can render the settings hint.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.event_capacity == 0 {
            return Err(VoiceError::config("event_capacity must be greater than zero"));
        }
        if self.registration_timeout_ms == Some(0) {
            return Err(VoiceError::config("registration_timeout_ms must be positive when set"));
        }
        if self.connect_timeout_ms == Some(0) {
            return Err(VoiceError::config("connect_timeout_ms must be positive when set"));
        }
        if !(self.meter.gain.is_finite() && self.meter.gain > 0.0) {
            return Err(VoiceError::config("meter.gain must be a positive number"));
        }
        if self.meter.frame_size == 0 || self.meter.sample_rate == 0 {
            return Err(VoiceError::config("meter.frame_size and meter.sample_rate must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VoiceConfig::new();
        assert!(config.token.is_empty());
        assert_eq!(config.failure_policy, CommandFailurePolicy::Silent);
        assert_eq!(config.registration_timeout(), None);
        assert_eq!(config.unknown_caller, "Unknown");
        assert_eq!(config.meter.gain, 1.8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_whitespace_token_passes_validation() {
        let config = VoiceConfig::new().with_token("   \t");
        // Still valid: the controller reports the missing token lazily
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        assert!(VoiceConfig::new().with_event_capacity(0).validate().is_err());

        let mut config = VoiceConfig::new();
        config.connect_timeout_ms = Some(0);
        assert!(config.validate().is_err());

        let config = VoiceConfig::new().with_meter(MeterConfig {
            gain: 0.0,
            ..MeterConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_document_deserializes() {
        let config: VoiceConfig = toml::from_str(
            r#"
            token = "abc"
            failure_policy = "warn"
            connect_timeout_ms = 15000

            [meter]
            gain = 2.0
            "#,
        )
        .unwrap();

        assert_eq!(config.token, "abc");
        assert_eq!(config.failure_policy, CommandFailurePolicy::Warn);
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(config.meter.gain, 2.0);
        assert_eq!(config.meter.frame_size, 1024);
        assert_eq!(config.event_capacity, 256);
    }
}

//! Error types for the voice session controller
//!
//! Errors are produced by the telephony capability (registration, outbound
//! connect, call commands) and by the controller's own validation. They never
//! escape a controller command: the controller folds them into the session
//! snapshot (`status = error`, `error = message`) or, for best-effort call
//! commands, into a logged [`VoiceEvent::CommandFailed`](crate::events::VoiceEvent).

use thiserror::Error;

use crate::types::CallCommand;

/// Result type for voice session operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Message shown when `initialize`/`start_call` run without a credential token
pub const TOKEN_MISSING_MESSAGE: &str = "Twilio token is missing. Add it in Settings.";

/// Errors that can occur while driving a telephony session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VoiceError {
    /// Missing or inconsistent configuration (e.g. empty credential token)
    #[error("{message}")]
    Configuration { message: String },

    /// Device registration was rejected or failed on the network
    #[error("Device registration failed: {reason}")]
    Registration { reason: String },

    /// The outbound connect command was rejected
    #[error("Failed to start call: {reason}")]
    CallSetup { reason: String },

    /// A fire-and-forget call command failed
    #[error("Call command '{command}' failed: {reason}")]
    Command { command: CallCommand, reason: String },

    /// The telephony client or the microphone could not be opened
    #[error("Device error: {message}")]
    Device { message: String },

    /// An awaited telephony operation exceeded its configured timeout
    #[error("Operation timed out after {duration_ms} ms")]
    Timeout { duration_ms: u64 },
}

impl VoiceError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The error reported when the credential token is empty or whitespace
    pub fn token_missing() -> Self {
        Self::config(TOKEN_MISSING_MESSAGE)
    }

    /// Create a registration error
    pub fn registration(reason: impl Into<String>) -> Self {
        Self::Registration {
            reason: reason.into(),
        }
    }

    /// Create a call setup error
    pub fn call_setup(reason: impl Into<String>) -> Self {
        Self::CallSetup {
            reason: reason.into(),
        }
    }

    /// Create a call command error
    pub fn command(command: CallCommand, reason: impl Into<String>) -> Self {
        Self::Command {
            command,
            reason: reason.into(),
        }
    }

    /// Create a device error
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    /// Short category name used in structured log fields
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Registration { .. } => "registration",
            Self::CallSetup { .. } => "call_setup",
            Self::Command { .. } => "command",
            Self::Device { .. } => "device",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Whether invoking `initialize` again may clear this error
    ///
    /// The controller never retries on its own; this only tells the UI whether
    /// offering a retry makes sense.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Registration { .. }
            | Self::CallSetup { .. }
            | Self::Command { .. }
            | Self::Device { .. }
            | Self::Timeout { .. } => true,
            Self::Configuration { .. } => false,
        }
    }
}

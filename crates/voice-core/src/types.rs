//! Type definitions shared by the controller, the reducer and the UI layer

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier of one call instance
pub type CallId = uuid::Uuid;

/// Authoritative status of the voice session
///
/// Exactly one value holds at any instant. It is never set directly by the
/// UI; every change is the outcome of a command or a telephony event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceStatus {
    /// No telephony client, or the client is unregistered with no call
    #[default]
    Idle,
    /// `initialize` is waiting for registration to resolve
    Initializing,
    /// Registered and idle
    Ready,
    /// An incoming call is offered and waiting for the operator
    Incoming,
    /// A call is being connected (outbound, or an accepted incoming call)
    Calling,
    /// Media is flowing on the active call
    InCall,
    /// Reserved for a finished call; no transition currently produces it
    Ended,
    /// The last attempt or a device/call event failed
    Error,
}

impl VoiceStatus {
    /// Wire name of the status (`in_call`, `ready`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceStatus::Idle => "idle",
            VoiceStatus::Initializing => "initializing",
            VoiceStatus::Ready => "ready",
            VoiceStatus::Incoming => "incoming",
            VoiceStatus::Calling => "calling",
            VoiceStatus::InCall => "in_call",
            VoiceStatus::Ended => "ended",
            VoiceStatus::Error => "error",
        }
    }

    /// Whether a call is connecting or connected, i.e. the microphone meter should run
    pub fn is_live(&self) -> bool {
        matches!(self, VoiceStatus::Calling | VoiceStatus::InCall)
    }

    /// Whether the dial pad may place a new outbound call
    pub fn can_dial(&self) -> bool {
        matches!(self, VoiceStatus::Ready | VoiceStatus::Idle)
    }
}

impl fmt::Display for VoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a call relative to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    /// Placed by the operator via `start_call`
    Outbound,
    /// Offered by the telephony client
    Inbound,
}

/// Fire-and-forget command issued to a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallCommand {
    Accept,
    Reject,
    Disconnect,
    Mute,
}

impl CallCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallCommand::Accept => "accept",
            CallCommand::Reject => "reject",
            CallCommand::Disconnect => "disconnect",
            CallCommand::Mute => "mute",
        }
    }
}

impl fmt::Display for CallCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the session handed to the UI layer
///
/// `has_active_call` is computed when the snapshot is taken and is never
/// stored alongside the call reference.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoiceSnapshot {
    /// Current session status
    pub status: VoiceStatus,
    /// Last failure message; present while status is `error`
    pub error: Option<String>,
    /// Transient best-effort command warning (only with `CommandFailurePolicy::Warn`)
    pub warning: Option<String>,
    /// Mirrors the active call's mute flag; false without an active call
    pub muted: bool,
    /// True once a telephony client has been constructed
    pub has_device: bool,
    /// True while an active call is held
    pub has_active_call: bool,
    /// Caller identifier of the pending incoming call
    pub incoming_from: Option<String>,
}

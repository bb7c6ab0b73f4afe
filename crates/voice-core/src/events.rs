//! Event types for the voice session
//!
//! Two streams flow through the controller:
//!
//! - **Inbound** [`TelephonyEvent`]s, emitted by the telephony client and its
//!   calls on an unbounded mpsc channel and consumed by the controller's pump
//!   task in delivery order
//! - **Outbound** [`VoiceEvent`]s, broadcast to any number of observers
//!   (status changes, best-effort command failures, busy rejections)
//!
//! The session snapshot itself is published separately through a
//! `tokio::sync::watch` channel; `VoiceEvent`s describe *what happened*,
//! the snapshot describes *where the session is*.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;

use crate::telephony::CallHandle;
use crate::types::{CallCommand, CallId, VoiceStatus};

/// Device-level events
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Registration succeeded
    Registered,
    /// The endpoint is no longer registered
    Unregistered,
    /// A new call is offered to the operator
    Incoming(Arc<dyn CallHandle>),
    /// Device-level failure
    Error(String),
    /// The credential token is about to expire
    TokenWillExpire,
}

/// Call-level events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// The call was answered and media is flowing
    Accepted,
    /// The call ended (either side hung up)
    Disconnected,
    /// The remote party hung up before the call was accepted
    Cancelled,
    /// The call was rejected
    Rejected,
    /// Call-level failure
    Error(String),
}

impl CallEvent {
    /// Whether this event ends the call's lifetime
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallEvent::Disconnected | CallEvent::Cancelled | CallEvent::Rejected
        )
    }
}

/// Tagged event stream produced by a telephony client
#[derive(Debug, Clone)]
pub enum TelephonyEvent {
    Device(DeviceEvent),
    Call { call_id: CallId, event: CallEvent },
}

/// Sender half handed to telephony clients
pub type TelephonyEventSender = mpsc::UnboundedSender<TelephonyEvent>;

/// Receiver half drained by the controller's pump task
pub type TelephonyEventReceiver = mpsc::UnboundedReceiver<TelephonyEvent>;

/// Notifications published by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// The session status changed
    StatusChanged {
        previous: VoiceStatus,
        current: VoiceStatus,
        timestamp: DateTime<Utc>,
    },
    /// A best-effort call command failed; local state was not rolled back
    CommandFailed {
        command: CallCommand,
        call_id: CallId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A call was offered while another was active and was rejected
    BusyRejected {
        call_id: CallId,
        from: Option<String>,
    },
    /// The telephony client asked for a fresh credential
    TokenWillExpire,
    /// The controller was torn down
    Disposed,
}

/// Stream of controller notifications
pub type EventStream = BroadcastStream<VoiceEvent>;

/// Broadcast emitter for [`VoiceEvent`]s
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<VoiceEvent>,
}

impl EventEmitter {
    /// Create a new event emitter with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event
    pub fn emit(&self, event: VoiceEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe as a stream
    pub fn subscribe(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Subscribe with a plain receiver
    pub fn receiver(&self) -> broadcast::Receiver<VoiceEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

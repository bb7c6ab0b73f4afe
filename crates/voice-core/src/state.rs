//! Session state and its reducer
//!
//! [`SessionState`] is the single source of truth for the voice session. It
//! owns the active and incoming call slots and derives the status from them.
//! Every change goes through [`SessionState::apply`], which takes one
//! [`SessionInput`] (a command phase or a telephony event) and returns the
//! [`Effect`]s the controller must perform afterwards: call commands and
//! notifications. The reducer performs no I/O, so every transition can be
//! exercised without a telephony SDK.
//!
//! # Call tracking
//!
//! At most one of the two slots is occupied at any time. A call's events are
//! only honoured while the call occupies a slot. Events for any other call id
//! are ignored, which makes teardown idempotent and keeps busy-rejected calls
//! invisible. The one exception is an outbound `connect` still in flight: its
//! call may report before the controller adopts it, so while a dial is
//! outstanding untracked events are buffered and replayed on adoption.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::{CommandFailurePolicy, VoiceConfig};
use crate::error::TOKEN_MISSING_MESSAGE;
use crate::events::{CallEvent, DeviceEvent, VoiceEvent};
use crate::telephony::CallHandle;
use crate::types::{CallCommand, CallId, VoiceSnapshot, VoiceStatus};

const DEVICE_ERROR_FALLBACK: &str = "Device error";
const CALL_ERROR_FALLBACK: &str = "Call error";

/// One step fed to the reducer
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// `initialize` began
    InitializeStarted,
    /// The credential token is empty or whitespace
    TokenMissing,
    /// A telephony client was constructed
    DeviceCreated,
    /// The telephony client could not be constructed
    DeviceUnavailable(String),
    /// `register()` resolved
    RegistrationSucceeded,
    /// `register()` failed during `initialize`
    RegistrationFailed(String),
    /// `start_call` is about to dial
    CallStartRequested,
    /// `start_call` was refused before dialing
    CallStartRefused(String),
    /// `connect()` resolved with a call
    CallStarted(Arc<dyn CallHandle>),
    /// `connect()` failed
    CallStartFailed(String),
    /// Operator accepted the pending incoming call
    AcceptIncoming,
    /// The accept command was refused by the call
    AcceptFailed(String),
    /// Operator rejected the pending incoming call
    RejectIncoming,
    /// Operator hung up the active call
    HangUp,
    /// Operator toggled mute on the active call
    ToggleMute,
    /// A best-effort call command failed
    CommandFailed {
        command: CallCommand,
        call_id: CallId,
        reason: String,
    },
    /// Drop a surfaced best-effort warning
    ClearWarning,
    /// Device-level telephony event
    Device(DeviceEvent),
    /// Call-level telephony event
    Call { call_id: CallId, event: CallEvent },
    /// The controller is being torn down
    Dispose,
}

/// Side effect requested by the reducer
#[derive(Debug, Clone)]
pub enum Effect {
    Accept(Arc<dyn CallHandle>),
    Reject(Arc<dyn CallHandle>),
    Disconnect(Arc<dyn CallHandle>),
    Mute(Arc<dyn CallHandle>, bool),
    Notify(VoiceEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallRole {
    Active,
    Incoming,
    Untracked,
}

/// State owned exclusively by the controller
#[derive(Debug)]
pub struct SessionState {
    status: VoiceStatus,
    error: Option<String>,
    warning: Option<String>,
    muted: bool,
    has_device: bool,
    incoming_from: Option<String>,
    active_call: Option<Arc<dyn CallHandle>>,
    /// Whether the active call has been accepted (media flowing)
    active_connected: bool,
    incoming_call: Option<Arc<dyn CallHandle>>,
    /// Outbound connects that have not resolved yet
    dials_in_flight: usize,
    early_events: VecDeque<(CallId, CallEvent)>,
    early_event_limit: usize,
    failure_policy: CommandFailurePolicy,
    unknown_caller: String,
    disposed: bool,
}

impl SessionState {
    /// Fresh idle state using the policies from `config`
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            status: VoiceStatus::Idle,
            error: None,
            warning: None,
            muted: false,
            has_device: false,
            incoming_from: None,
            active_call: None,
            active_connected: false,
            incoming_call: None,
            dials_in_flight: 0,
            early_events: VecDeque::new(),
            early_event_limit: config.early_event_limit,
            failure_policy: config.failure_policy,
            unknown_caller: config.unknown_caller.clone(),
            disposed: false,
        }
    }

    pub fn status(&self) -> VoiceStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn has_device(&self) -> bool {
        self.has_device
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn active_call(&self) -> Option<&Arc<dyn CallHandle>> {
        self.active_call.as_ref()
    }

    pub fn incoming_call(&self) -> Option<&Arc<dyn CallHandle>> {
        self.incoming_call.as_ref()
    }

    pub fn active_call_id(&self) -> Option<CallId> {
        self.active_call.as_ref().map(|c| c.id())
    }

    pub fn incoming_call_id(&self) -> Option<CallId> {
        self.incoming_call.as_ref().map(|c| c.id())
    }

    /// Read-only view for the UI
    pub fn snapshot(&self) -> VoiceSnapshot {
        VoiceSnapshot {
            status: self.status,
            error: self.error.clone(),
            warning: self.warning.clone(),
            muted: self.muted,
            has_device: self.has_device,
            has_active_call: self.active_call.is_some(),
            incoming_from: self.incoming_from.clone(),
        }
    }

    /// Apply one input and return the effects to perform
    pub fn apply(&mut self, input: SessionInput) -> Vec<Effect> {
        if self.disposed && !matches!(input, SessionInput::Dispose) {
            debug!(?input, "Ignoring input after dispose");
            return Vec::new();
        }

        match input {
            SessionInput::InitializeStarted => {
                self.error = None;
                if !self.tracks_call() {
                    self.status = VoiceStatus::Initializing;
                }
                Vec::new()
            }
            SessionInput::TokenMissing => {
                self.has_device = false;
                self.fail(TOKEN_MISSING_MESSAGE.to_string());
                Vec::new()
            }
            SessionInput::DeviceCreated => {
                self.has_device = true;
                Vec::new()
            }
            SessionInput::DeviceUnavailable(message) => {
                self.fail(message);
                Vec::new()
            }
            SessionInput::RegistrationSucceeded => {
                self.error = None;
                self.status = self.resting_status();
                Vec::new()
            }
            SessionInput::RegistrationFailed(message) | SessionInput::CallStartRefused(message) => {
                self.fail(message);
                Vec::new()
            }
            SessionInput::CallStartRequested => {
                self.error = None;
                self.dials_in_flight += 1;
                Vec::new()
            }
            SessionInput::CallStarted(call) => self.adopt_outbound(call),
            SessionInput::CallStartFailed(message) => {
                self.finish_dial();
                self.fail(message);
                Vec::new()
            }
            SessionInput::AcceptIncoming => self.accept_incoming(),
            SessionInput::AcceptFailed(message) => {
                self.fail(message);
                Vec::new()
            }
            SessionInput::RejectIncoming => {
                let Some(call) = self.incoming_call.take() else {
                    return Vec::new();
                };
                self.incoming_from = None;
                self.status = self.resting_status();
                vec![Effect::Reject(call)]
            }
            SessionInput::HangUp => match &self.active_call {
                // State is cleared by the call's own Disconnected event
                Some(call) => vec![Effect::Disconnect(call.clone())],
                None => Vec::new(),
            },
            SessionInput::ToggleMute => {
                let Some(call) = self.active_call.clone() else {
                    return Vec::new();
                };
                // Optimistic: the flag flips even if the command later fails
                self.muted = !self.muted;
                vec![Effect::Mute(call, self.muted)]
            }
            SessionInput::CommandFailed {
                command,
                call_id,
                reason,
            } => {
                if self.failure_policy == CommandFailurePolicy::Warn {
                    self.warning = Some(reason.clone());
                }
                vec![Effect::Notify(VoiceEvent::CommandFailed {
                    command,
                    call_id,
                    reason,
                    timestamp: Utc::now(),
                })]
            }
            SessionInput::ClearWarning => {
                self.warning = None;
                Vec::new()
            }
            SessionInput::Device(event) => self.on_device_event(event),
            SessionInput::Call { call_id, event } => self.on_call_event(call_id, event),
            SessionInput::Dispose => self.dispose(),
        }
    }

    fn on_device_event(&mut self, event: DeviceEvent) -> Vec<Effect> {
        match event {
            DeviceEvent::Registered => {
                self.error = None;
                self.status = self.resting_status();
                Vec::new()
            }
            DeviceEvent::Unregistered => {
                // A registration change never interrupts a call in progress
                if !self.tracks_call() {
                    self.status = VoiceStatus::Idle;
                }
                Vec::new()
            }
            DeviceEvent::Incoming(call) => self.offer_incoming(call),
            DeviceEvent::Error(message) => {
                self.fail(non_empty_or(message, DEVICE_ERROR_FALLBACK));
                Vec::new()
            }
            DeviceEvent::TokenWillExpire => vec![Effect::Notify(VoiceEvent::TokenWillExpire)],
        }
    }

    fn offer_incoming(&mut self, call: Arc<dyn CallHandle>) -> Vec<Effect> {
        let from = call.parameters().caller().map(str::to_string);

        if self.active_call.is_some() || self.incoming_call.is_some() || self.dials_in_flight > 0 {
            debug!(call_id = %call.id(), ?from, "Busy, rejecting offered call");
            let call_id = call.id();
            return vec![
                Effect::Reject(call),
                Effect::Notify(VoiceEvent::BusyRejected { call_id, from }),
            ];
        }

        self.incoming_from = Some(from.unwrap_or_else(|| self.unknown_caller.clone()));
        self.incoming_call = Some(call);
        self.status = VoiceStatus::Incoming;
        Vec::new()
    }

    fn on_call_event(&mut self, call_id: CallId, event: CallEvent) -> Vec<Effect> {
        match self.role_of(call_id) {
            CallRole::Untracked => {
                if self.dials_in_flight > 0 {
                    self.buffer_early_event(call_id, event);
                } else {
                    debug!(%call_id, ?event, "Ignoring event for untracked call");
                }
                Vec::new()
            }
            CallRole::Active => match event {
                CallEvent::Accepted => {
                    self.active_connected = true;
                    self.status = VoiceStatus::InCall;
                    Vec::new()
                }
                CallEvent::Disconnected | CallEvent::Cancelled | CallEvent::Rejected => {
                    self.end_active_call();
                    Vec::new()
                }
                CallEvent::Error(message) => {
                    self.fail(non_empty_or(message, CALL_ERROR_FALLBACK));
                    Vec::new()
                }
            },
            CallRole::Incoming => match event {
                CallEvent::Accepted => {
                    // Answered without accept_incoming; promote it
                    self.active_call = self.incoming_call.take();
                    self.active_connected = true;
                    self.incoming_from = None;
                    self.muted = false;
                    self.status = VoiceStatus::InCall;
                    Vec::new()
                }
                CallEvent::Disconnected | CallEvent::Cancelled | CallEvent::Rejected => {
                    self.incoming_call = None;
                    self.incoming_from = None;
                    self.status = self.resting_status();
                    Vec::new()
                }
                CallEvent::Error(message) => {
                    self.fail(non_empty_or(message, CALL_ERROR_FALLBACK));
                    Vec::new()
                }
            },
        }
    }

    fn adopt_outbound(&mut self, call: Arc<dyn CallHandle>) -> Vec<Effect> {
        let call_id = call.id();
        let (replay, keep): (VecDeque<_>, VecDeque<_>) = self
            .early_events
            .drain(..)
            .partition(|(id, _)| *id == call_id);
        self.early_events = keep;
        self.finish_dial();

        if self.active_call.is_some() {
            warn!(%call_id, "A call is already active, dropping the new outbound call");
            return vec![Effect::Disconnect(call)];
        }

        let mut effects = Vec::new();
        if let Some(pending) = self.incoming_call.take() {
            debug!(call_id = %pending.id(), "Outbound call adopted, rejecting the ringing call");
            self.incoming_from = None;
            effects.push(Effect::Reject(pending));
        }

        self.active_call = Some(call);
        self.active_connected = false;
        self.muted = false;
        self.status = VoiceStatus::Calling;

        for (id, event) in replay {
            debug!(call_id = %id, ?event, "Replaying early call event");
            effects.extend(self.on_call_event(id, event));
        }
        effects
    }

    fn accept_incoming(&mut self) -> Vec<Effect> {
        if self.incoming_call.is_none() {
            return Vec::new();
        }
        if self.active_call.is_some() {
            warn!("Cannot accept while another call is active");
            return Vec::new();
        }

        // Move the call between slots in one step
        let Some(call) = self.incoming_call.take() else {
            return Vec::new();
        };
        self.active_call = Some(call.clone());
        self.active_connected = false;
        self.incoming_from = None;
        self.muted = false;
        self.status = VoiceStatus::Calling;
        vec![Effect::Accept(call)]
    }

    fn end_active_call(&mut self) {
        self.active_call = None;
        self.active_connected = false;
        self.muted = false;
        self.status = self.resting_status();
    }

    fn dispose(&mut self) -> Vec<Effect> {
        if self.disposed {
            return Vec::new();
        }
        self.disposed = true;
        self.active_call = None;
        self.active_connected = false;
        self.incoming_call = None;
        self.incoming_from = None;
        self.muted = false;
        self.has_device = false;
        self.dials_in_flight = 0;
        self.early_events.clear();
        self.status = VoiceStatus::Idle;
        vec![Effect::Notify(VoiceEvent::Disposed)]
    }

    /// One outstanding dial resolved; the buffer only outlives the last one
    fn finish_dial(&mut self) {
        self.dials_in_flight = self.dials_in_flight.saturating_sub(1);
        if self.dials_in_flight == 0 {
            self.early_events.clear();
        }
    }

    fn buffer_early_event(&mut self, call_id: CallId, event: CallEvent) {
        if self.early_event_limit == 0 {
            return;
        }
        if self.early_events.len() >= self.early_event_limit {
            self.early_events.pop_front();
        }
        debug!(%call_id, ?event, "Buffering event for untracked call");
        self.early_events.push_back((call_id, event));
    }

    fn role_of(&self, call_id: CallId) -> CallRole {
        if self.active_call_id() == Some(call_id) {
            CallRole::Active
        } else if self.incoming_call_id() == Some(call_id) {
            CallRole::Incoming
        } else {
            CallRole::Untracked
        }
    }

    fn tracks_call(&self) -> bool {
        self.active_call.is_some() || self.incoming_call.is_some()
    }

    /// Status implied by the call slots when nothing has failed
    fn resting_status(&self) -> VoiceStatus {
        if self.active_call.is_some() {
            if self.active_connected {
                VoiceStatus::InCall
            } else {
                VoiceStatus::Calling
            }
        } else if self.incoming_call.is_some() {
            VoiceStatus::Incoming
        } else if self.has_device {
            VoiceStatus::Ready
        } else {
            VoiceStatus::Idle
        }
    }

    fn fail(&mut self, message: String) {
        self.error = Some(message);
        self.status = VoiceStatus::Error;
    }
}

fn non_empty_or(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceResult;
    use crate::telephony::{CallParameters, FROM_PARAM};
    use crate::types::CallDirection;
    use proptest::prelude::*;

    #[derive(Debug)]
    struct StubCall {
        id: CallId,
        from: Option<String>,
    }

    impl StubCall {
        fn inbound(from: &str) -> Arc<dyn CallHandle> {
            Arc::new(StubCall {
                id: CallId::new_v4(),
                from: Some(from.to_string()),
            })
        }

        fn anonymous() -> Arc<dyn CallHandle> {
            Arc::new(StubCall {
                id: CallId::new_v4(),
                from: None,
            })
        }
    }

    impl CallHandle for StubCall {
        fn id(&self) -> CallId {
            self.id
        }
        fn direction(&self) -> CallDirection {
            CallDirection::Inbound
        }
        fn parameters(&self) -> CallParameters {
            match &self.from {
                Some(from) => CallParameters::new().with_param(FROM_PARAM, from.clone()),
                None => CallParameters::new(),
            }
        }
        fn accept(&self) -> VoiceResult<()> {
            Ok(())
        }
        fn reject(&self) -> VoiceResult<()> {
            Ok(())
        }
        fn disconnect(&self) -> VoiceResult<()> {
            Ok(())
        }
        fn mute(&self, _muted: bool) -> VoiceResult<()> {
            Ok(())
        }
    }

    fn ready_state() -> SessionState {
        let mut state = SessionState::new(&VoiceConfig::new());
        state.apply(SessionInput::DeviceCreated);
        state.apply(SessionInput::RegistrationSucceeded);
        assert_eq!(state.status(), VoiceStatus::Ready);
        state
    }

    fn in_call_state() -> (SessionState, Arc<dyn CallHandle>) {
        let mut state = ready_state();
        let call = StubCall::inbound("+998901000000");
        state.apply(SessionInput::CallStarted(call.clone()));
        state.apply(SessionInput::Call {
            call_id: call.id(),
            event: CallEvent::Accepted,
        });
        assert_eq!(state.status(), VoiceStatus::InCall);
        (state, call)
    }

    #[test]
    fn test_token_missing_sets_error_without_device() {
        let mut state = SessionState::new(&VoiceConfig::new());
        state.apply(SessionInput::InitializeStarted);
        assert_eq!(state.status(), VoiceStatus::Initializing);

        state.apply(SessionInput::TokenMissing);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, VoiceStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some(TOKEN_MISSING_MESSAGE));
        assert!(!snapshot.has_device);
    }

    #[test]
    fn test_initialize_clears_previous_error() {
        let mut state = ready_state();
        state.apply(SessionInput::Device(DeviceEvent::Error("socket closed".into())));
        assert_eq!(state.status(), VoiceStatus::Error);

        state.apply(SessionInput::InitializeStarted);
        assert_eq!(state.error(), None);
        assert_eq!(state.status(), VoiceStatus::Initializing);

        state.apply(SessionInput::RegistrationFailed("invalid token".into()));
        assert_eq!(state.status(), VoiceStatus::Error);
        assert_eq!(state.error(), Some("invalid token"));
    }

    #[test]
    fn test_busy_offer_is_rejected_without_state_change() {
        let (mut state, _) = in_call_state();
        let before = state.snapshot();

        let second = StubCall::inbound("+998901112233");
        let effects = state.apply(SessionInput::Device(DeviceEvent::Incoming(second.clone())));

        assert_eq!(state.snapshot(), before);
        assert!(state.incoming_call().is_none());
        assert!(matches!(&effects[0], Effect::Reject(c) if c.id() == second.id()));
        assert!(matches!(
            &effects[1],
            Effect::Notify(VoiceEvent::BusyRejected { from: Some(f), .. }) if f == "+998901112233"
        ));
    }

    #[test]
    fn test_incoming_without_from_uses_fallback() {
        let mut state = ready_state();
        state.apply(SessionInput::Device(DeviceEvent::Incoming(StubCall::anonymous())));
        assert_eq!(state.status(), VoiceStatus::Incoming);
        assert_eq!(state.snapshot().incoming_from.as_deref(), Some("Unknown"));
    }

    #[test]
    fn test_accept_moves_call_between_slots() {
        let mut state = ready_state();
        let call = StubCall::inbound("+998901112233");
        state.apply(SessionInput::Device(DeviceEvent::Incoming(call.clone())));

        let effects = state.apply(SessionInput::AcceptIncoming);

        assert_eq!(state.active_call_id(), Some(call.id()));
        assert!(state.incoming_call().is_none());
        assert_eq!(state.snapshot().incoming_from, None);
        assert_eq!(state.status(), VoiceStatus::Calling);
        assert!(matches!(&effects[..], [Effect::Accept(c)] if c.id() == call.id()));

        state.apply(SessionInput::Call {
            call_id: call.id(),
            event: CallEvent::Accepted,
        });
        assert_eq!(state.status(), VoiceStatus::InCall);
    }

    #[test]
    fn test_accept_failure_keeps_moved_call() {
        let mut state = ready_state();
        let call = StubCall::inbound("+998901112233");
        state.apply(SessionInput::Device(DeviceEvent::Incoming(call.clone())));
        state.apply(SessionInput::AcceptIncoming);
        state.apply(SessionInput::AcceptFailed("Failed to accept call".into()));

        assert_eq!(state.status(), VoiceStatus::Error);
        assert_eq!(state.active_call_id(), Some(call.id()));
    }

    #[test]
    fn test_reject_incoming_returns_to_ready() {
        let mut state = ready_state();
        let call = StubCall::inbound("+998901112233");
        state.apply(SessionInput::Device(DeviceEvent::Incoming(call.clone())));

        let effects = state.apply(SessionInput::RejectIncoming);
        assert!(matches!(&effects[..], [Effect::Reject(c)] if c.id() == call.id()));
        assert_eq!(state.status(), VoiceStatus::Ready);
        assert_eq!(state.snapshot().incoming_from, None);

        // Nothing pending any more
        assert!(state.apply(SessionInput::RejectIncoming).is_empty());
    }

    #[test]
    fn test_hang_up_waits_for_disconnect_event() {
        let (mut state, call) = in_call_state();
        let effects = state.apply(SessionInput::HangUp);
        assert!(matches!(&effects[..], [Effect::Disconnect(_)]));
        assert_eq!(state.status(), VoiceStatus::InCall);
        assert!(state.active_call().is_some());

        state.apply(SessionInput::Call {
            call_id: call.id(),
            event: CallEvent::Disconnected,
        });
        assert_eq!(state.status(), VoiceStatus::Ready);
        assert!(state.active_call().is_none());
    }

    #[test]
    fn test_mute_is_optimistic_and_reset_on_end() {
        let (mut state, call) = in_call_state();
        let effects = state.apply(SessionInput::ToggleMute);
        assert!(matches!(&effects[..], [Effect::Mute(_, true)]));
        assert!(state.is_muted());

        state.apply(SessionInput::CommandFailed {
            command: CallCommand::Mute,
            call_id: call.id(),
            reason: "not connected".into(),
        });
        assert!(state.is_muted());

        state.apply(SessionInput::Call {
            call_id: call.id(),
            event: CallEvent::Cancelled,
        });
        assert!(!state.is_muted());
        assert_eq!(state.status(), VoiceStatus::Ready);
    }

    #[test]
    fn test_toggle_mute_without_call_is_noop() {
        let mut state = ready_state();
        assert!(state.apply(SessionInput::ToggleMute).is_empty());
        assert!(!state.is_muted());
    }

    #[test]
    fn test_warn_policy_surfaces_warning() {
        let config = VoiceConfig::new().with_failure_policy(CommandFailurePolicy::Warn);
        let mut state = SessionState::new(&config);
        state.apply(SessionInput::CommandFailed {
            command: CallCommand::Reject,
            call_id: CallId::new_v4(),
            reason: "transport closed".into(),
        });
        assert_eq!(
            state.snapshot().warning.as_deref(),
            Some("transport closed")
        );

        state.apply(SessionInput::ClearWarning);
        assert_eq!(state.snapshot().warning, None);
    }

    #[test]
    fn test_silent_policy_keeps_snapshot_clean() {
        let mut state = ready_state();
        let effects = state.apply(SessionInput::CommandFailed {
            command: CallCommand::Disconnect,
            call_id: CallId::new_v4(),
            reason: "gone".into(),
        });
        assert_eq!(state.snapshot().warning, None);
        assert!(matches!(&effects[..], [Effect::Notify(VoiceEvent::CommandFailed { .. })]));
    }

    #[test]
    fn test_unregistered_does_not_interrupt_call() {
        let (mut state, _) = in_call_state();
        state.apply(SessionInput::Device(DeviceEvent::Unregistered));
        assert_eq!(state.status(), VoiceStatus::InCall);

        let mut idle = ready_state();
        idle.apply(SessionInput::Device(DeviceEvent::Unregistered));
        assert_eq!(idle.status(), VoiceStatus::Idle);
    }

    #[test]
    fn test_registered_during_call_keeps_call_status() {
        let (mut state, _) = in_call_state();
        state.apply(SessionInput::Device(DeviceEvent::Registered));
        assert_eq!(state.status(), VoiceStatus::InCall);
    }

    #[test]
    fn test_error_events_supersede_status() {
        let (mut state, call) = in_call_state();
        state.apply(SessionInput::Call {
            call_id: call.id(),
            event: CallEvent::Error(String::new()),
        });
        assert_eq!(state.status(), VoiceStatus::Error);
        assert_eq!(state.error(), Some("Call error"));

        state.apply(SessionInput::Device(DeviceEvent::Error("".into())));
        assert_eq!(state.error(), Some("Device error"));
    }

    #[test]
    fn test_events_for_untracked_call_are_ignored() {
        let mut state = ready_state();
        let before = state.snapshot();
        state.apply(SessionInput::Call {
            call_id: CallId::new_v4(),
            event: CallEvent::Disconnected,
        });
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_early_events_replay_on_adoption() {
        let mut state = ready_state();
        let call = StubCall::inbound("+998901112233");
        state.apply(SessionInput::CallStartRequested);
        state.apply(SessionInput::Call {
            call_id: call.id(),
            event: CallEvent::Accepted,
        });
        assert_eq!(state.status(), VoiceStatus::Ready);

        state.apply(SessionInput::CallStarted(call));
        assert_eq!(state.status(), VoiceStatus::InCall);
    }

    #[test]
    fn test_second_outbound_call_is_dropped() {
        let (mut state, call) = in_call_state();
        let extra = StubCall::anonymous();
        let effects = state.apply(SessionInput::CallStarted(extra.clone()));
        assert!(matches!(&effects[..], [Effect::Disconnect(c)] if c.id() == extra.id()));
        assert_eq!(state.active_call_id(), Some(call.id()));
    }

    #[test]
    fn test_events_without_dial_in_flight_are_not_buffered() {
        let mut state = ready_state();
        let call = StubCall::anonymous();
        state.apply(SessionInput::Call {
            call_id: call.id(),
            event: CallEvent::Accepted,
        });

        state.apply(SessionInput::CallStartRequested);
        state.apply(SessionInput::CallStarted(call));
        assert_eq!(state.status(), VoiceStatus::Calling);
    }

    #[test]
    fn test_failed_dial_drops_buffered_events() {
        let mut state = ready_state();
        let late = StubCall::anonymous();
        state.apply(SessionInput::CallStartRequested);
        state.apply(SessionInput::Call {
            call_id: late.id(),
            event: CallEvent::Accepted,
        });
        state.apply(SessionInput::CallStartFailed("Operation timed out after 30 ms".into()));
        assert_eq!(state.status(), VoiceStatus::Error);

        state.apply(SessionInput::CallStartRequested);
        state.apply(SessionInput::CallStarted(late));
        assert_eq!(state.status(), VoiceStatus::Calling);
    }

    #[test]
    fn test_offer_during_dial_is_busy_rejected() {
        let mut state = ready_state();
        state.apply(SessionInput::CallStartRequested);

        let offered = StubCall::inbound("+998901112233");
        let effects = state.apply(SessionInput::Device(DeviceEvent::Incoming(offered.clone())));
        assert!(matches!(&effects[0], Effect::Reject(c) if c.id() == offered.id()));
        assert!(state.incoming_call().is_none());
        assert_eq!(state.snapshot().incoming_from, None);
    }

    #[test]
    fn test_adopting_outbound_rejects_ringing_call() {
        let mut state = ready_state();
        let ringing = StubCall::inbound("+998901112233");
        state.apply(SessionInput::Device(DeviceEvent::Incoming(ringing.clone())));
        let outbound = StubCall::anonymous();

        let effects = state.apply(SessionInput::CallStarted(outbound.clone()));

        assert!(matches!(&effects[..], [Effect::Reject(c)] if c.id() == ringing.id()));
        assert!(state.incoming_call().is_none());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, VoiceStatus::Calling);
        assert_eq!(snapshot.incoming_from, None);
        assert_eq!(state.active_call_id(), Some(outbound.id()));
    }

    #[test]
    fn test_late_answer_of_rejected_call_keeps_outbound() {
        let mut state = ready_state();
        let ringing = StubCall::inbound("+998901112233");
        state.apply(SessionInput::Device(DeviceEvent::Incoming(ringing.clone())));
        let outbound = StubCall::anonymous();
        state.apply(SessionInput::CallStarted(outbound.clone()));

        let effects = state.apply(SessionInput::Call {
            call_id: ringing.id(),
            event: CallEvent::Accepted,
        });

        assert!(effects.is_empty());
        assert_eq!(state.active_call_id(), Some(outbound.id()));
        assert_eq!(state.status(), VoiceStatus::Calling);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (mut state, _) = in_call_state();
        let effects = state.apply(SessionInput::Dispose);
        assert!(matches!(&effects[..], [Effect::Notify(VoiceEvent::Disposed)]));
        let after = state.snapshot();
        assert!(!after.has_device);
        assert!(!after.has_active_call);

        assert!(state.apply(SessionInput::Dispose).is_empty());
        assert_eq!(state.snapshot(), after);
        assert!(state.apply(SessionInput::ToggleMute).is_empty());
    }

    // ===== PROPERTY TESTS =====

    #[derive(Debug, Clone)]
    enum Step {
        Offer,
        Start,
        StartFailed,
        Accept,
        Reject,
        HangUp,
        Mute,
        Event(usize, CallEvent),
        Registered,
        Unregistered,
        DeviceError,
    }

    fn call_event() -> impl Strategy<Value = CallEvent> {
        prop_oneof![
            Just(CallEvent::Accepted),
            Just(CallEvent::Disconnected),
            Just(CallEvent::Cancelled),
            Just(CallEvent::Rejected),
            Just(CallEvent::Error("boom".to_string())),
        ]
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => Just(Step::Offer),
            2 => Just(Step::Start),
            1 => Just(Step::StartFailed),
            2 => Just(Step::Accept),
            1 => Just(Step::Reject),
            1 => Just(Step::HangUp),
            2 => Just(Step::Mute),
            4 => (0usize..8, call_event()).prop_map(|(i, e)| Step::Event(i, e)),
            1 => Just(Step::Registered),
            1 => Just(Step::Unregistered),
            1 => Just(Step::DeviceError),
        ]
    }

    fn check_invariants(state: &SessionState) -> Result<(), TestCaseError> {
        let snapshot = state.snapshot();
        let active = state.active_call_id();
        let incoming = state.incoming_call_id();

        prop_assert!(
            active.is_none() || incoming.is_none(),
            "active and incoming slots both occupied"
        );
        if snapshot.incoming_from.is_some() {
            prop_assert!(matches!(
                snapshot.status,
                VoiceStatus::Incoming | VoiceStatus::Error
            ));
        }
        if snapshot.status == VoiceStatus::Incoming {
            prop_assert!(incoming.is_some() && active.is_none());
        }
        if snapshot.status != VoiceStatus::Error && incoming.is_some() && active.is_none() {
            prop_assert_eq!(snapshot.status, VoiceStatus::Incoming);
        }
        if snapshot.status == VoiceStatus::InCall {
            prop_assert!(active.is_some());
        }
        if active.is_none() {
            prop_assert!(!snapshot.muted, "muted without an active call");
        }
        prop_assert_eq!(snapshot.has_active_call, active.is_some());
        prop_assert_eq!(snapshot.incoming_from.is_some(), incoming.is_some());
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_session_invariants_hold(steps in proptest::collection::vec(step(), 1..60)) {
            let mut state = ready_state();
            let mut calls: Vec<Arc<dyn CallHandle>> = Vec::new();

            for step in steps {
                let busy_before = state.active_call().is_some();
                let snapshot_before = state.snapshot();
                let incoming_before = state.incoming_call_id();

                match step {
                    Step::Offer => {
                        let call = StubCall::inbound("+998901112233");
                        calls.push(call.clone());
                        let effects = state.apply(SessionInput::Device(DeviceEvent::Incoming(call.clone())));
                        if busy_before {
                            prop_assert_eq!(state.snapshot(), snapshot_before.clone());
                            prop_assert_eq!(state.incoming_call_id(), incoming_before);
                            prop_assert!(matches!(&effects[0], Effect::Reject(c) if c.id() == call.id()));
                        }
                    }
                    Step::Start => {
                        let call = StubCall::anonymous();
                        calls.push(call.clone());
                        state.apply(SessionInput::CallStartRequested);
                        state.apply(SessionInput::CallStarted(call));
                    }
                    Step::StartFailed => {
                        state.apply(SessionInput::CallStartRequested);
                        state.apply(SessionInput::CallStartFailed("rejected".into()));
                    }
                    Step::Accept => { state.apply(SessionInput::AcceptIncoming); }
                    Step::Reject => { state.apply(SessionInput::RejectIncoming); }
                    Step::HangUp => { state.apply(SessionInput::HangUp); }
                    Step::Mute => { state.apply(SessionInput::ToggleMute); }
                    Step::Event(index, event) => {
                        if let Some(call) = calls.get(index) {
                            let was_tracked = state.active_call_id() == Some(call.id())
                                || state.incoming_call_id() == Some(call.id());
                            let terminal = event.is_terminal();
                            state.apply(SessionInput::Call { call_id: call.id(), event });
                            if terminal && was_tracked && state.active_call().is_none() {
                                prop_assert!(!state.is_muted());
                            }
                        }
                    }
                    Step::Registered => { state.apply(SessionInput::Device(DeviceEvent::Registered)); }
                    Step::Unregistered => { state.apply(SessionInput::Device(DeviceEvent::Unregistered)); }
                    Step::DeviceError => { state.apply(SessionInput::Device(DeviceEvent::Error("lost".into()))); }
                }

                check_invariants(&state)?;
            }
        }
    }
}

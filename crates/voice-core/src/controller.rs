//! Voice session controller
//!
//! [`VoiceSessionController`] is the single authority over the telephony
//! session. UI commands and telephony events both become
//! [`SessionInput`]s for the reducer in [`crate::state`]; the controller
//! performs the resulting [`Effect`]s, publishes the new snapshot and
//! broadcasts [`VoiceEvent`]s.
//!
//! # Concurrency
//!
//! State lives behind a `parking_lot::Mutex` that is never held across an
//! await point. Only `initialize` and `start_call` suspend (on `register`
//! and `connect`); every other command is synchronous and fire-and-forget.
//! Telephony events are drained by one pump task per client, so they are
//! applied in delivery order.
//!
//! # Examples
//!
//! ```rust
//! use callcenter_voice_core::{VoiceConfig, VoiceSessionController, VoiceStatus};
//! use callcenter_voice_core::simulated::SimulatedConnector;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = Arc::new(SimulatedConnector::new());
//! let controller = VoiceSessionController::new(
//!     VoiceConfig::new().with_token("token-123"),
//!     connector,
//! )?;
//!
//! let snapshot = controller.initialize().await;
//! assert_eq!(snapshot.status, VoiceStatus::Ready);
//! assert!(snapshot.has_device);
//!
//! controller.dispose();
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::VoiceConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::events::{
    EventEmitter, EventStream, TelephonyEvent, TelephonyEventReceiver, VoiceEvent,
};
use crate::recovery::with_optional_timeout;
use crate::state::{Effect, SessionInput, SessionState};
use crate::telephony::{CallHandle, ConnectParams, TelephonyClient, TelephonyConnector};
use crate::types::{CallCommand, VoiceSnapshot, VoiceStatus};

/// Handle to one voice session
///
/// Cloning is cheap and every clone drives the same session. The session is
/// disposed by [`dispose`](Self::dispose) or when the last handle is dropped.
#[derive(Clone)]
pub struct VoiceSessionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: VoiceConfig,
    token: Mutex<String>,
    connector: Arc<dyn TelephonyConnector>,
    state: Mutex<SessionState>,
    client: Mutex<Option<Arc<dyn TelephonyClient>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    snapshot_tx: watch::Sender<VoiceSnapshot>,
    events: EventEmitter,
}

impl VoiceSessionController {
    /// Create a controller for `config.token`
    ///
    /// No telephony client is built yet; that happens on the first
    /// `initialize` or `start_call`. Returns a configuration error if
    /// `config` is inconsistent. An empty token is accepted here and
    /// reported by the first command instead.
    pub fn new(config: VoiceConfig, connector: Arc<dyn TelephonyConnector>) -> VoiceResult<Self> {
        config.validate()?;

        let state = SessionState::new(&config);
        let (snapshot_tx, _) = watch::channel(state.snapshot());
        let events = EventEmitter::new(config.event_capacity);

        Ok(Self {
            inner: Arc::new(ControllerInner {
                token: Mutex::new(config.token.clone()),
                config,
                connector,
                state: Mutex::new(state),
                client: Mutex::new(None),
                pump: Mutex::new(None),
                snapshot_tx,
                events,
            }),
        })
    }

    /// Register the telephony device
    ///
    /// Never fails: the outcome is reported through the returned snapshot
    /// (`ready` on success, `error` with a message otherwise).
    pub async fn initialize(&self) -> VoiceSnapshot {
        let inner = &self.inner;
        if inner.is_disposed() {
            return self.snapshot();
        }

        inner.apply(SessionInput::InitializeStarted);
        let Some(client) = self.ensure_client() else {
            return self.snapshot();
        };

        let result = with_optional_timeout(
            "register",
            inner.config.registration_timeout(),
            client.register(),
        )
        .await;

        match result {
            Ok(()) => {
                info!("Telephony device registered");
                inner.apply(SessionInput::RegistrationSucceeded);
            }
            Err(e) => {
                error!(error = %e, category = e.category(), "Device registration failed");
                inner.apply(SessionInput::RegistrationFailed(e.to_string()));
            }
        }

        self.snapshot()
    }

    /// Place an outbound call to `to`
    ///
    /// Refused without any state change while another call is active or an
    /// incoming call is ringing. An idle device gets one best-effort
    /// registration attempt first; its failure does not stop the dial.
    /// Calls offered while the dial is in flight are rejected as busy.
    pub async fn start_call(&self, to: &str) -> VoiceSnapshot {
        let inner = &self.inner;
        if inner.is_disposed() {
            return self.snapshot();
        }

        let (active, ringing) = {
            let state = inner.state.lock();
            (state.active_call_id(), state.incoming_call_id())
        };
        if let Some(call_id) = active {
            warn!(%call_id, "A call is already active, refusing to dial");
            return self.snapshot();
        }
        if let Some(call_id) = ringing {
            warn!(%call_id, "An incoming call is ringing, refusing to dial");
            return self.snapshot();
        }

        let to = to.trim();
        if to.is_empty() {
            let e = VoiceError::call_setup("destination is empty");
            warn!(error = %e, "Refusing to dial");
            inner.apply(SessionInput::CallStartRefused(e.to_string()));
            return self.snapshot();
        }

        let Some(client) = self.ensure_client() else {
            return self.snapshot();
        };

        inner.apply(SessionInput::CallStartRequested);

        if self.status() == VoiceStatus::Idle {
            let registered = with_optional_timeout(
                "register",
                inner.config.registration_timeout(),
                client.register(),
            )
            .await;
            if let Err(e) = registered {
                warn!(error = %e, "Pre-call registration failed, dialing anyway");
            }
        }

        let connected = with_optional_timeout(
            "connect",
            inner.config.connect_timeout(),
            client.connect(ConnectParams::new(to)),
        )
        .await;

        match connected {
            Ok(call) => {
                info!(call_id = %call.id(), to, "Outbound call started");
                inner.apply(SessionInput::CallStarted(call));
            }
            Err(e) => {
                error!(error = %e, category = e.category(), to, "Outbound call failed");
                inner.apply(SessionInput::CallStartFailed(e.to_string()));
            }
        }

        self.snapshot()
    }

    /// Accept the pending incoming call (no-op without one)
    pub fn accept_incoming(&self) {
        self.inner.apply(SessionInput::AcceptIncoming);
    }

    /// Reject the pending incoming call (no-op without one)
    pub fn reject_incoming(&self) {
        self.inner.apply(SessionInput::RejectIncoming);
    }

    /// Ask the active call to disconnect
    ///
    /// The session is cleared when the call reports `Disconnected`, not here.
    pub fn hang_up(&self) {
        self.inner.apply(SessionInput::HangUp);
    }

    /// Flip mute on the active call (no-op without one)
    pub fn toggle_mute(&self) {
        self.inner.apply(SessionInput::ToggleMute);
    }

    /// Swap the credential token
    ///
    /// An existing client gets the new token right away; otherwise it is
    /// used when the client is built.
    pub fn refresh_token(&self, token: impl Into<String>) {
        let token = token.into();
        *self.inner.token.lock() = token.clone();

        let client = self.inner.client.lock().clone();
        if let Some(client) = client {
            match client.update_token(&token) {
                Ok(()) => info!("Telephony token refreshed"),
                Err(e) => warn!(error = %e, "Failed to refresh telephony token"),
            }
        }
    }

    /// Drop a surfaced best-effort command warning
    pub fn clear_warning(&self) {
        self.inner.apply(SessionInput::ClearWarning);
    }

    /// Tear the session down
    ///
    /// Destroys the telephony client and drops every call reference. Safe to
    /// call more than once; later commands are no-ops.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Current snapshot
    pub fn snapshot(&self) -> VoiceSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn status(&self) -> VoiceStatus {
        self.inner.snapshot_tx.borrow().status
    }

    /// Watch the snapshot; the receiver sees every published change
    pub fn subscribe(&self) -> watch::Receiver<VoiceSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Stream of controller notifications
    pub fn events(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    /// Plain broadcast receiver for controller notifications
    pub fn event_receiver(&self) -> broadcast::Receiver<VoiceEvent> {
        self.inner.events.receiver()
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.inner.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Build the telephony client on first use, reuse it afterwards
    ///
    /// Reporting the missing token or a construction failure goes through the
    /// reducer; `None` tells the caller to stop.
    fn ensure_client(&self) -> Option<Arc<dyn TelephonyClient>> {
        let inner = &self.inner;
        let token = inner.token.lock().clone();
        if token.trim().is_empty() {
            let e = VoiceError::token_missing();
            warn!(error = %e, category = e.category(), "Cannot create telephony device");
            inner.apply(SessionInput::TokenMissing);
            return None;
        }

        let mut slot = inner.client.lock();
        if let Some(client) = slot.as_ref() {
            if let Err(e) = client.update_token(&token) {
                warn!(error = %e, "Failed to re-apply token on existing device");
            }
            return Some(client.clone());
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        match inner.connector.create_client(&token, tx) {
            Ok(client) => {
                *slot = Some(client.clone());
                drop(slot);

                let pump = tokio::spawn(pump_events(Arc::downgrade(inner), rx));
                if let Some(previous) = inner.pump.lock().replace(pump) {
                    previous.abort();
                }

                info!("Telephony device created");
                inner.apply(SessionInput::DeviceCreated);
                Some(client)
            }
            Err(e) => {
                drop(slot);
                error!(error = %e, category = e.category(), "Failed to create telephony device");
                inner.apply(SessionInput::DeviceUnavailable(e.to_string()));
                None
            }
        }
    }
}

impl std::fmt::Debug for VoiceSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSessionController")
            .field("snapshot", &*self.inner.snapshot_tx.borrow())
            .finish()
    }
}

impl ControllerInner {
    fn is_disposed(&self) -> bool {
        self.state.lock().is_disposed()
    }

    /// Feed one input to the reducer, publish, then perform the effects
    fn apply(&self, input: SessionInput) {
        let effects = {
            let mut state = self.state.lock();
            let previous = state.status();
            let effects = state.apply(input);
            let snapshot = state.snapshot();

            if snapshot.status != previous {
                if snapshot.status == VoiceStatus::Error {
                    error!(
                        previous = %previous,
                        error = snapshot.error.as_deref().unwrap_or_default(),
                        "Voice session failed"
                    );
                } else {
                    debug!(previous = %previous, status = %snapshot.status, "Voice status changed");
                }
                self.events.emit(VoiceEvent::StatusChanged {
                    previous,
                    current: snapshot.status,
                    timestamp: Utc::now(),
                });
            }

            // Published under the lock so observers never see snapshots out of order
            self.snapshot_tx.send_if_modified(|current| {
                if *current == snapshot {
                    false
                } else {
                    *current = snapshot;
                    true
                }
            });
            effects
        };

        for effect in effects {
            self.perform(effect);
        }
    }

    fn perform(&self, effect: Effect) {
        match effect {
            Effect::Accept(call) => {
                if let Err(e) = call.accept() {
                    error!(call_id = %call.id(), error = %e, "Failed to accept call");
                    self.apply(SessionInput::AcceptFailed(e.to_string()));
                }
            }
            Effect::Reject(call) => {
                let result = call.reject();
                self.best_effort(CallCommand::Reject, &call, result);
            }
            Effect::Disconnect(call) => {
                let result = call.disconnect();
                self.best_effort(CallCommand::Disconnect, &call, result);
            }
            Effect::Mute(call, muted) => {
                let result = call.mute(muted);
                self.best_effort(CallCommand::Mute, &call, result);
            }
            Effect::Notify(event) => self.events.emit(event),
        }
    }

    /// Best-effort commands never roll state back; the failure is logged and observable
    fn best_effort(&self, command: CallCommand, call: &Arc<dyn CallHandle>, result: VoiceResult<()>) {
        let Err(e) = result else {
            debug!(call_id = %call.id(), %command, "Call command issued");
            return;
        };

        warn!(
            call_id = %call.id(),
            %command,
            error = %e,
            category = e.category(),
            "Call command failed"
        );
        self.apply(SessionInput::CommandFailed {
            command,
            call_id: call.id(),
            reason: e.to_string(),
        });
    }

    fn dispose(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        let client = self.client.lock().take();
        if let Some(client) = client {
            client.destroy();
            info!("Telephony device destroyed");
        }
        self.apply(SessionInput::Dispose);
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Drain telephony events into the reducer until the client goes away
async fn pump_events(inner: Weak<ControllerInner>, mut rx: TelephonyEventReceiver) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let input = match event {
            TelephonyEvent::Device(event) => SessionInput::Device(event),
            TelephonyEvent::Call { call_id, event } => SessionInput::Call { call_id, event },
        };
        inner.apply(input);
    }
    debug!("Telephony event stream closed");
}

//! In-process telephony and microphone backends
//!
//! The simulated backend implements [`TelephonyConnector`],
//! [`TelephonyClient`], [`CallHandle`] and [`MicrophoneSource`] without any
//! network or audio hardware. Outcomes are scripted up front, commands are
//! recorded per call, and the far end is driven by hand through helpers such
//! as [`SimulatedClient::offer_incoming`] and [`SimulatedCall::answer`].
//!
//! With auto-signaling enabled, call commands echo the events a real SDK
//! would emit (`accept` → `Accepted`, `disconnect` → `Disconnected`, ...).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, trace};

use crate::audio::{AudioFrame, MicrophoneSource};
use crate::config::MeterConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::events::{CallEvent, DeviceEvent, TelephonyEvent, TelephonyEventSender};
use crate::telephony::{
    CallHandle, CallParameters, ConnectParams, FROM_PARAM, TO_PARAM, TelephonyClient,
    TelephonyConnector,
};
use crate::types::{CallCommand, CallDirection, CallId};

/// Scripted result of `register()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Resolve and emit `Registered`
    Succeed,
    /// Reject with the given reason
    Fail(String),
    /// Never resolve
    Hang,
}

/// Scripted result of `connect()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Succeed,
    Fail(String),
    Hang,
}

#[derive(Debug, Clone)]
struct Script {
    register: RegisterOutcome,
    connect: ConnectOutcome,
    create_failure: Option<String>,
    command_failures: HashMap<CallCommand, String>,
    early_events: Vec<CallEvent>,
    auto_signaling: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            register: RegisterOutcome::Succeed,
            connect: ConnectOutcome::Succeed,
            create_failure: None,
            command_failures: HashMap::new(),
            early_events: Vec::new(),
            auto_signaling: false,
        }
    }
}

/// Builds [`SimulatedClient`]s and keeps every client it built
#[derive(Debug, Default)]
pub struct SimulatedConnector {
    script: Arc<Mutex<Script>>,
    clients: Mutex<Vec<Arc<SimulatedClient>>>,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_register_outcome(self, outcome: RegisterOutcome) -> Self {
        self.set_register_outcome(outcome);
        self
    }

    pub fn with_connect_outcome(self, outcome: ConnectOutcome) -> Self {
        self.set_connect_outcome(outcome);
        self
    }

    /// Make `create_client` fail
    pub fn with_create_failure(self, reason: impl Into<String>) -> Self {
        self.script.lock().create_failure = Some(reason.into());
        self
    }

    /// Make `command` fail on every call
    pub fn with_command_failure(self, command: CallCommand, reason: impl Into<String>) -> Self {
        self.script.lock().command_failures.insert(command, reason.into());
        self
    }

    /// Events emitted for an outbound call before `connect` resolves
    pub fn with_early_events(self, events: Vec<CallEvent>) -> Self {
        self.script.lock().early_events = events;
        self
    }

    pub fn with_auto_signaling(self, enabled: bool) -> Self {
        self.script.lock().auto_signaling = enabled;
        self
    }

    /// Change the registration outcome for existing and future clients
    pub fn set_register_outcome(&self, outcome: RegisterOutcome) {
        self.script.lock().register = outcome;
    }

    pub fn set_connect_outcome(&self, outcome: ConnectOutcome) {
        self.script.lock().connect = outcome;
    }

    pub fn clients_created(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn last_client(&self) -> Option<Arc<SimulatedClient>> {
        self.clients.lock().last().cloned()
    }
}

impl TelephonyConnector for SimulatedConnector {
    fn create_client(
        &self,
        token: &str,
        events: TelephonyEventSender,
    ) -> VoiceResult<Arc<dyn TelephonyClient>> {
        if let Some(reason) = self.script.lock().create_failure.clone() {
            return Err(VoiceError::device(reason));
        }

        let client = Arc::new(SimulatedClient {
            token: Mutex::new(token.to_string()),
            events,
            script: self.script.clone(),
            calls: Mutex::new(Vec::new()),
            dialed: Mutex::new(Vec::new()),
            register_count: AtomicUsize::new(0),
            destroy_count: AtomicUsize::new(0),
        });
        self.clients.lock().push(client.clone());
        debug!("Simulated telephony client created");
        Ok(client)
    }
}

/// One simulated endpoint
pub struct SimulatedClient {
    token: Mutex<String>,
    events: TelephonyEventSender,
    script: Arc<Mutex<Script>>,
    calls: Mutex<Vec<Arc<SimulatedCall>>>,
    dialed: Mutex<Vec<String>>,
    register_count: AtomicUsize,
    destroy_count: AtomicUsize,
}

impl SimulatedClient {
    pub fn token(&self) -> String {
        self.token.lock().clone()
    }

    pub fn register_count(&self) -> usize {
        self.register_count.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroy_count.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroy_count() > 0
    }

    /// Destinations passed to `connect`, in order
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().clone()
    }

    /// Every call this client has produced (outbound and offered)
    pub fn calls(&self) -> Vec<Arc<SimulatedCall>> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Option<Arc<SimulatedCall>> {
        self.calls.lock().last().cloned()
    }

    /// Most recent call that has neither ended nor been rejected
    pub fn live_call(&self) -> Option<Arc<SimulatedCall>> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|c| !c.is_ended() && !c.received(CallCommand::Reject))
            .cloned()
    }

    /// Offer an inbound call from `from` (no `From` parameter when `None`)
    pub fn offer_incoming(&self, from: Option<&str>) -> Arc<SimulatedCall> {
        let mut parameters = CallParameters::new();
        if let Some(from) = from {
            parameters = parameters.with_param(FROM_PARAM, from);
        }
        let call = self.new_call(CallDirection::Inbound, parameters);
        debug!(call_id = %call.id(), ?from, "Offering simulated incoming call");
        self.emit(DeviceEvent::Incoming(call.clone()));
        call
    }

    /// Emit a device-level event
    pub fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(TelephonyEvent::Device(event));
    }

    fn new_call(&self, direction: CallDirection, parameters: CallParameters) -> Arc<SimulatedCall> {
        let script = self.script.lock();
        let call = Arc::new(SimulatedCall {
            id: CallId::new_v4(),
            direction,
            parameters,
            events: self.events.clone(),
            failures: Mutex::new(script.command_failures.clone()),
            auto_signaling: script.auto_signaling,
            commands: Mutex::new(Vec::new()),
            muted: Mutex::new(false),
            ended: AtomicBool::new(false),
        });
        drop(script);
        self.calls.lock().push(call.clone());
        call
    }
}

impl fmt::Debug for SimulatedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedClient")
            .field("calls", &self.calls.lock().len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[async_trait]
impl TelephonyClient for SimulatedClient {
    fn update_token(&self, token: &str) -> VoiceResult<()> {
        *self.token.lock() = token.to_string();
        Ok(())
    }

    async fn register(&self) -> VoiceResult<()> {
        self.register_count.fetch_add(1, Ordering::SeqCst);
        if self.is_destroyed() {
            return Err(VoiceError::device("client destroyed"));
        }

        let outcome = self.script.lock().register.clone();
        match outcome {
            RegisterOutcome::Succeed => {
                self.emit(DeviceEvent::Registered);
                Ok(())
            }
            RegisterOutcome::Fail(reason) => Err(VoiceError::registration(reason)),
            RegisterOutcome::Hang => futures::future::pending().await,
        }
    }

    async fn connect(&self, params: ConnectParams) -> VoiceResult<Arc<dyn CallHandle>> {
        if self.is_destroyed() {
            return Err(VoiceError::device("client destroyed"));
        }
        self.dialed.lock().push(params.to.clone());

        let (outcome, early_events) = {
            let script = self.script.lock();
            (script.connect.clone(), script.early_events.clone())
        };
        match outcome {
            ConnectOutcome::Succeed => {
                let call = self.new_call(
                    CallDirection::Outbound,
                    CallParameters::new().with_param(TO_PARAM, params.to),
                );
                for event in early_events {
                    call.emit(event);
                }
                // Give the pump a chance to see early events first
                tokio::task::yield_now().await;
                Ok(call)
            }
            ConnectOutcome::Fail(reason) => Err(VoiceError::call_setup(reason)),
            ConnectOutcome::Hang => futures::future::pending().await,
        }
    }

    fn destroy(&self) {
        if self.destroy_count.fetch_add(1, Ordering::SeqCst) == 0 {
            debug!("Simulated telephony client destroyed");
        }
    }
}

/// One simulated call
pub struct SimulatedCall {
    id: CallId,
    direction: CallDirection,
    parameters: CallParameters,
    events: TelephonyEventSender,
    failures: Mutex<HashMap<CallCommand, String>>,
    auto_signaling: bool,
    commands: Mutex<Vec<CallCommand>>,
    muted: Mutex<bool>,
    ended: AtomicBool,
}

impl SimulatedCall {
    /// Commands received so far, in order (failed ones included)
    pub fn commands(&self) -> Vec<CallCommand> {
        self.commands.lock().clone()
    }

    pub fn received(&self, command: CallCommand) -> bool {
        self.commands.lock().contains(&command)
    }

    /// Mute flag as last set by a successful `mute`
    pub fn is_muted(&self) -> bool {
        *self.muted.lock()
    }

    /// Make `command` fail on this call
    pub fn fail_command(&self, command: CallCommand, reason: impl Into<String>) {
        self.failures.lock().insert(command, reason.into());
    }

    /// Whether a terminal event has been emitted for this call
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Emit a call-level event
    pub fn emit(&self, event: CallEvent) {
        if event.is_terminal() {
            self.ended.store(true, Ordering::SeqCst);
        }
        let _ = self.events.send(TelephonyEvent::Call {
            call_id: self.id,
            event,
        });
    }

    /// The far end answered
    pub fn answer(&self) {
        self.emit(CallEvent::Accepted);
    }

    /// The far end hung up
    pub fn hang_up_remote(&self) {
        self.emit(CallEvent::Disconnected);
    }

    /// The caller gave up before the call was accepted
    pub fn cancel_remote(&self) {
        self.emit(CallEvent::Cancelled);
    }

    fn record(&self, command: CallCommand) -> VoiceResult<()> {
        trace!(call_id = %self.id, %command, "Simulated call command");
        self.commands.lock().push(command);
        match self.failures.lock().get(&command) {
            Some(reason) => Err(VoiceError::command(command, reason.clone())),
            None => Ok(()),
        }
    }

    fn echo(&self, event: CallEvent) {
        if self.auto_signaling {
            self.emit(event);
        }
    }
}

impl fmt::Debug for SimulatedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedCall")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .finish()
    }
}

impl CallHandle for SimulatedCall {
    fn id(&self) -> CallId {
        self.id
    }

    fn direction(&self) -> CallDirection {
        self.direction
    }

    fn parameters(&self) -> CallParameters {
        self.parameters.clone()
    }

    fn accept(&self) -> VoiceResult<()> {
        self.record(CallCommand::Accept)?;
        self.echo(CallEvent::Accepted);
        Ok(())
    }

    fn reject(&self) -> VoiceResult<()> {
        self.record(CallCommand::Reject)?;
        self.echo(CallEvent::Rejected);
        Ok(())
    }

    fn disconnect(&self) -> VoiceResult<()> {
        self.record(CallCommand::Disconnect)?;
        self.echo(CallEvent::Disconnected);
        Ok(())
    }

    fn mute(&self, muted: bool) -> VoiceResult<()> {
        self.record(CallCommand::Mute)?;
        *self.muted.lock() = muted;
        Ok(())
    }
}

/// How the simulated microphone answers a permission request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MicrophoneBehavior {
    Grant,
    Deny(String),
    /// Wait until [`SimulatedMicrophone::grant`] is called
    Pending,
}

/// Microphone that produces only the frames pushed into it
#[derive(Debug)]
pub struct SimulatedMicrophone {
    behavior: Mutex<MicrophoneBehavior>,
    permission: Notify,
    frames: Mutex<Option<mpsc::Sender<AudioFrame>>>,
    opens: AtomicUsize,
    releases: AtomicUsize,
}

impl SimulatedMicrophone {
    pub fn new(behavior: MicrophoneBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            permission: Notify::new(),
            frames: Mutex::new(None),
            opens: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn granting() -> Self {
        Self::new(MicrophoneBehavior::Grant)
    }

    /// Resolve a pending permission request
    pub fn grant(&self) {
        *self.behavior.lock() = MicrophoneBehavior::Grant;
        self.permission.notify_one();
    }

    /// Deliver a frame to the open capture; false when not open or full
    pub fn push_frame(&self, frame: AudioFrame) -> bool {
        match self.frames.lock().as_ref() {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.frames.lock().is_some()
    }

    /// Close the frame stream as if the device disappeared
    pub fn unplug(&self) {
        self.frames.lock().take();
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn open(&self) -> mpsc::Receiver<AudioFrame> {
        let (tx, rx) = mpsc::channel(64);
        *self.frames.lock() = Some(tx);
        self.opens.fetch_add(1, Ordering::SeqCst);
        rx
    }
}

#[async_trait]
impl MicrophoneSource for SimulatedMicrophone {
    async fn start_capture(&self, _config: &MeterConfig) -> VoiceResult<mpsc::Receiver<AudioFrame>> {
        loop {
            let behavior = self.behavior.lock().clone();
            match behavior {
                MicrophoneBehavior::Grant => return Ok(self.open()),
                MicrophoneBehavior::Deny(reason) => return Err(VoiceError::device(reason)),
                MicrophoneBehavior::Pending => self.permission.notified().await,
            }
        }
    }

    async fn stop_capture(&self) -> VoiceResult<()> {
        self.frames.lock().take();
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(connector: &SimulatedConnector) -> (Arc<dyn TelephonyClient>, mpsc::UnboundedReceiver<TelephonyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (connector.create_client("token", tx).unwrap(), rx)
    }

    #[tokio::test]
    async fn test_register_emits_registered() {
        let connector = SimulatedConnector::new();
        let (client, mut rx) = client(&connector);

        client.register().await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(TelephonyEvent::Device(DeviceEvent::Registered))
        ));
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let connector = SimulatedConnector::new()
            .with_register_outcome(RegisterOutcome::Fail("invalid token".into()))
            .with_connect_outcome(ConnectOutcome::Fail("busy".into()));
        let (client, _rx) = client(&connector);

        assert_eq!(client.register().await, Err(VoiceError::registration("invalid token")));
        assert!(client.connect(ConnectParams::new("+1")).await.is_err());
        assert_eq!(connector.last_client().unwrap().dialed(), vec!["+1".to_string()]);
    }

    #[tokio::test]
    async fn test_auto_signaling_echoes_commands() {
        let connector = SimulatedConnector::new().with_auto_signaling(true);
        let (client, mut rx) = client(&connector);

        let call = client.connect(ConnectParams::new("+998901112233")).await.unwrap();
        call.disconnect().unwrap();

        match rx.recv().await {
            Some(TelephonyEvent::Call { call_id, event }) => {
                assert_eq!(call_id, call.id());
                assert_eq!(event, CallEvent::Disconnected);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_command_failure_is_recorded() {
        let connector = SimulatedConnector::new().with_command_failure(CallCommand::Mute, "no media");
        let (tx, _rx) = mpsc::unbounded_channel();
        connector.create_client("token", tx).unwrap();
        let sim = connector.last_client().unwrap();

        let call = sim.offer_incoming(Some("+998901112233"));
        assert!(call.mute(true).is_err());
        assert!(!call.is_muted());
        assert_eq!(call.commands(), vec![CallCommand::Mute]);
        assert_eq!(call.parameters().caller(), Some("+998901112233"));

        assert_eq!(sim.live_call().map(|c| c.id()), Some(call.id()));
        call.cancel_remote();
        assert!(call.is_ended());
        assert!(sim.live_call().is_none());
    }

    #[tokio::test]
    async fn test_microphone_release_closes_frames() {
        let mic = SimulatedMicrophone::granting();
        let mut frames = mic.start_capture(&MeterConfig::default()).await.unwrap();
        assert!(mic.push_frame(AudioFrame::silent(160, 8000)));
        assert!(frames.recv().await.is_some());

        mic.stop_capture().await.unwrap();
        assert!(!mic.is_open());
        assert!(frames.recv().await.is_none());
        assert_eq!((mic.open_count(), mic.release_count()), (1, 1));
    }
}

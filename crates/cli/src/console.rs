//! Line-oriented operator console

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use callcenter_voice_core::audio::{AudioFrame, AudioLevelMeter, CallAudioMonitor};
use callcenter_voice_core::simulated::{SimulatedCall, SimulatedConnector, SimulatedMicrophone};
use callcenter_voice_core::{VoiceEvent, VoiceSessionController, VoiceSnapshot, VoiceStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::settings::ConsoleSettings;

const HELP: &str = "\
commands:
  init               register the device
  call <number>      place an outbound call
  accept | reject    answer or decline the ringing call
  hangup             hang up the active call
  mute               toggle mute on the active call
  ring [from]        simulate an inbound call
  answer             simulate the far end answering
  remote-hangup      simulate the far end hanging up
  status             print the session as JSON
  help               show this text
  quit               leave the console";

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Init,
    Call(String),
    Accept,
    Reject,
    HangUp,
    Mute,
    Ring(Option<String>),
    Answer,
    RemoteHangUp,
    Status,
    Help,
    Quit,
}

impl Command {
    /// Parse a line; `Ok(None)` for a blank line
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let arg = words.next().map(str::to_string);

        let command = match head.to_ascii_lowercase().as_str() {
            "init" => Command::Init,
            "call" | "dial" => match arg {
                Some(number) => Command::Call(number),
                None => bail!("usage: call <number>"),
            },
            "accept" => Command::Accept,
            "reject" => Command::Reject,
            "hangup" | "hang-up" => Command::HangUp,
            "mute" => Command::Mute,
            "ring" => Command::Ring(arg),
            "answer" => Command::Answer,
            "remote-hangup" => Command::RemoteHangUp,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command '{}', try 'help'", other),
        };
        Ok(Some(command))
    }
}

/// The console: a controller on the simulated backend plus a live mic meter
pub struct Console {
    controller: VoiceSessionController,
    connector: Arc<SimulatedConnector>,
    monitor: Option<CallAudioMonitor>,
    tasks: Vec<JoinHandle<()>>,
}

impl Console {
    pub fn new(settings: ConsoleSettings) -> Result<Self> {
        let connector = Arc::new(SimulatedConnector::new().with_auto_signaling(settings.auto_signaling));
        let meter_config = settings.voice.meter.clone();
        let controller = VoiceSessionController::new(settings.voice, connector.clone())?;

        let mic = Arc::new(SimulatedMicrophone::granting());
        let meter = Arc::new(AudioLevelMeter::new(mic.clone(), meter_config.clone()));
        let monitor = CallAudioMonitor::spawn(
            &controller,
            meter,
            Arc::new(|level| trace!(level, "Microphone level")),
        );

        let tasks = vec![
            tokio::spawn(print_events(controller.event_receiver())),
            tokio::spawn(feed_microphone(mic, meter_config.frame_size, meter_config.sample_rate)),
        ];

        Ok(Self {
            controller,
            connector,
            monitor: Some(monitor),
            tasks,
        })
    }

    /// Read commands from stdin until `quit` or end of input
    pub async fn run(self) -> Result<()> {
        println!("voice console, type 'help' for commands");
        self.print_snapshot(&self.controller.snapshot());

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            match Command::parse(&line) {
                Ok(Some(command)) => {
                    if !self.execute(command).await? {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => println!("{}", e),
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Run one command; false means quit
    pub async fn execute(&self, command: Command) -> Result<bool> {
        debug!(?command, "Console command");
        let snapshot = match command {
            Command::Init => self.controller.initialize().await,
            Command::Call(number) => self.controller.start_call(&number).await,
            Command::Accept => {
                self.controller.accept_incoming();
                self.settled_snapshot().await
            }
            Command::Reject => {
                self.controller.reject_incoming();
                self.settled_snapshot().await
            }
            Command::HangUp => {
                self.controller.hang_up();
                self.settled_snapshot().await
            }
            Command::Mute => {
                self.controller.toggle_mute();
                self.settled_snapshot().await
            }
            Command::Ring(from) => {
                let Some(client) = self.connector.last_client() else {
                    println!("no device yet, run 'init' first");
                    return Ok(true);
                };
                client.offer_incoming(from.as_deref());
                self.settled_snapshot().await
            }
            Command::Answer => match self.far_end_call() {
                Some(call) => {
                    call.answer();
                    self.settled_snapshot().await
                }
                None => return Ok(true),
            },
            Command::RemoteHangUp => match self.far_end_call() {
                Some(call) => {
                    call.hang_up_remote();
                    self.settled_snapshot().await
                }
                None => return Ok(true),
            },
            Command::Status => {
                let snapshot = self.controller.snapshot();
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                return Ok(true);
            }
            Command::Help => {
                println!("{}", HELP);
                return Ok(true);
            }
            Command::Quit => return Ok(false),
        };

        self.print_snapshot(&snapshot);
        Ok(true)
    }

    fn far_end_call(&self) -> Option<Arc<SimulatedCall>> {
        let call = self.connector.last_client().and_then(|client| client.live_call());
        if call.is_none() {
            println!("no call on the far end");
        }
        call
    }

    /// Snapshot after the event pump caught up with the command
    async fn settled_snapshot(&self) -> VoiceSnapshot {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.controller.snapshot()
    }

    fn print_snapshot(&self, snapshot: &VoiceSnapshot) {
        let level = self
            .monitor
            .as_ref()
            .map(|m| m.meter().level())
            .unwrap_or_default();
        println!("{}", render(snapshot, level));
        if let Some(warning) = &snapshot.warning {
            println!("warning: {}", warning);
            self.controller.clear_warning();
        }
    }

    async fn shutdown(mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.shutdown().await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.controller.dispose();
    }
}

/// One-line view of the session
pub fn render(snapshot: &VoiceSnapshot, level: f32) -> String {
    let mut line = format!(
        "[{}] device={} call={} muted={}",
        snapshot.status,
        yes_no(snapshot.has_device),
        yes_no(snapshot.has_active_call),
        yes_no(snapshot.muted),
    );
    if let Some(from) = &snapshot.incoming_from {
        line.push_str(&format!(" incoming={}", from));
    }
    if snapshot.status.is_live() {
        let bars = (level * 10.0).round() as usize;
        line.push_str(&format!(" mic=[{:<10}]", "#".repeat(bars.min(10))));
    }
    if snapshot.status == VoiceStatus::Error {
        if let Some(error) = &snapshot.error {
            line.push_str(&format!(" error=\"{}\"", error));
        }
    }
    line
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

async fn print_events(mut events: broadcast::Receiver<VoiceEvent>) {
    loop {
        match events.recv().await {
            Ok(VoiceEvent::StatusChanged { .. }) => {}
            Ok(VoiceEvent::CommandFailed { command, reason, .. }) => {
                println!("! {} failed: {}", command, reason)
            }
            Ok(VoiceEvent::BusyRejected { from, .. }) => println!(
                "! busy, rejected call from {}",
                from.as_deref().unwrap_or("unknown caller")
            ),
            Ok(VoiceEvent::TokenWillExpire) => println!("! token will expire soon"),
            Ok(VoiceEvent::Disposed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Console event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Push a slowly varying test signal into the simulated microphone
async fn feed_microphone(mic: Arc<SimulatedMicrophone>, frame_size: usize, sample_rate: u32) {
    let frame_ms = (frame_size as u64 * 1000 / sample_rate.max(1) as u64).max(10);
    let mut interval = tokio::time::interval(Duration::from_millis(frame_ms));
    let mut tick: u64 = 0;
    loop {
        interval.tick().await;
        tick += 1;
        if !mic.is_open() {
            continue;
        }
        // Amplitude ramps up and down over about two seconds
        let phase = (tick % 20) as i32;
        let amplitude = (if phase < 10 { phase } else { 20 - phase }) * 1600;
        let samples = (0..frame_size)
            .map(|i| if i % 2 == 0 { amplitude as i16 } else { -(amplitude as i16) })
            .collect();
        mic.push_frame(AudioFrame::new(samples, sample_rate, tick * frame_ms));
    }
}

//! Microphone level meter

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::level::LevelAnalyzer;
use super::source::MicrophoneSource;
use crate::config::MeterConfig;

/// Callback receiving every computed level
pub type LevelCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Microphone permission as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicPermission {
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// Observable meter state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeterState {
    /// Last level in 0..1; 0 while the meter is not running
    pub level: f32,
    pub permission: MicPermission,
    /// Why the microphone could not be opened
    pub error: Option<String>,
    pub running: bool,
}

/// Runs a [`LevelAnalyzer`] over a [`MicrophoneSource`]
///
/// `start` spawns a capture task; `stop` cancels it (including a pending
/// permission request) and releases the microphone. Dropping the meter
/// releases it as well.
pub struct AudioLevelMeter {
    source: Arc<dyn MicrophoneSource>,
    config: MeterConfig,
    state: Arc<Mutex<MeterState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AudioLevelMeter {
    pub fn new(source: Arc<dyn MicrophoneSource>, config: MeterConfig) -> Self {
        Self {
            source,
            config,
            state: Arc::new(Mutex::new(MeterState::default())),
            task: Mutex::new(None),
        }
    }

    /// Begin metering; a no-op while already running
    ///
    /// A meter whose capture ended on its own (permission denied, frame
    /// stream closed) can be started again.
    pub fn start(&self, on_level: LevelCallback) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Audio level meter already running");
            return;
        }

        {
            let mut state = self.state.lock();
            state.running = true;
            state.level = 0.0;
            state.error = None;
        }

        let source = self.source.clone();
        let config = self.config.clone();
        let state = self.state.clone();
        *task = Some(tokio::spawn(async move {
            let mut frames = match source.start_capture(&config).await {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(error = %e, "Microphone permission denied");
                    let mut state = state.lock();
                    state.permission = MicPermission::Denied;
                    state.running = false;
                    state.level = 0.0;
                    state.error = Some(e.to_string());
                    return;
                }
            };

            info!("Microphone opened for level metering");
            state.lock().permission = MicPermission::Granted;

            let analyzer = LevelAnalyzer::from_config(&config);
            while let Some(frame) = frames.recv().await {
                let level = analyzer.level(&frame.samples);
                state.lock().level = level;
                on_level(level);
            }
            debug!("Microphone frame stream ended");
            let mut state = state.lock();
            state.running = false;
            state.level = 0.0;
        }));
    }

    /// Stop metering and release the microphone
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        if let Err(e) = self.source.stop_capture().await {
            warn!(error = %e, "Failed to release microphone");
        }

        let mut state = self.state.lock();
        if state.running {
            debug!("Audio level meter stopped");
        }
        state.running = false;
        state.level = 0.0;
    }

    /// Whether a capture is pending or delivering frames
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn state(&self) -> MeterState {
        self.state.lock().clone()
    }

    /// Current level, 0 unless running
    pub fn level(&self) -> f32 {
        let state = self.state.lock();
        if state.running { state.level } else { 0.0 }
    }

    pub fn permission(&self) -> MicPermission {
        self.state.lock().permission
    }
}

impl fmt::Debug for AudioLevelMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioLevelMeter")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Drop for AudioLevelMeter {
    fn drop(&mut self) {
        let Some(task) = self.task.get_mut().take() else {
            return;
        };
        task.abort();

        // Release still has to happen; finish it on the runtime if there is one
        let source = self.source.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = source.stop_capture().await {
                    warn!(error = %e, "Failed to release microphone on drop");
                }
            });
        }
    }
}

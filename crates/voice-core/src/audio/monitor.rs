//! Ties the level meter to the call status

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::meter::{AudioLevelMeter, LevelCallback};
use crate::controller::VoiceSessionController;
use crate::types::VoiceSnapshot;

/// Runs the meter exactly while the session status is live (`calling` or `in_call`)
///
/// The monitor stops the meter when the controller goes away or when it is
/// shut down.
#[derive(Debug)]
pub struct CallAudioMonitor {
    meter: Arc<AudioLevelMeter>,
    task: Option<JoinHandle<()>>,
}

impl CallAudioMonitor {
    pub fn spawn(
        controller: &VoiceSessionController,
        meter: Arc<AudioLevelMeter>,
        on_level: LevelCallback,
    ) -> Self {
        let snapshots = controller.subscribe();
        let task = tokio::spawn(follow_status(snapshots, meter.clone(), on_level));
        Self {
            meter,
            task: Some(task),
        }
    }

    pub fn meter(&self) -> &Arc<AudioLevelMeter> {
        &self.meter
    }

    /// Stop following the session and release the microphone
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        self.meter.stop().await;
    }
}

impl Drop for CallAudioMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn follow_status(
    mut snapshots: watch::Receiver<VoiceSnapshot>,
    meter: Arc<AudioLevelMeter>,
    on_level: LevelCallback,
) {
    loop {
        let live = snapshots.borrow_and_update().status.is_live();
        if live && !meter.is_running() {
            debug!("Call is live, starting level meter");
            meter.start(on_level.clone());
        } else if !live && meter.is_running() {
            debug!("Call is no longer live, stopping level meter");
            meter.stop().await;
        }

        if snapshots.changed().await.is_err() {
            break;
        }
    }
    meter.stop().await;
}

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::settings::SettingsStore;

use super::loop_worker::{acquisition_loop, AcquisitionLoop};
use super::state::{LiveStatus, RecordingState};

/// Owns the acquisition task and the operator-facing controls around it.
///
/// Cheap to clone; every exit path (stdin, Ctrl-C, end of input) can hold a
/// clone and call [`AcquisitionController::shutdown`], which only does its
/// work once.
#[derive(Clone)]
pub struct AcquisitionController {
    recording_tx: Arc<watch::Sender<RecordingState>>,
    cancel_token: CancellationToken,
    handle: Arc<Mutex<Option<JoinHandle<AcquisitionLoop>>>>,
    shut_down: Arc<AtomicBool>,
    settings: Arc<SettingsStore>,
}

impl AcquisitionController {
    pub fn new(settings: Arc<SettingsStore>, initial: RecordingState) -> Self {
        let (recording_tx, _) = watch::channel(initial);
        Self {
            recording_tx: Arc::new(recording_tx),
            cancel_token: CancellationToken::new(),
            handle: Arc::new(Mutex::new(None)),
            shut_down: Arc::new(AtomicBool::new(false)),
            settings,
        }
    }

    pub async fn start(&self, worker: AcquisitionLoop, period: Duration) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            bail!("acquisition already shut down");
        }
        if period.is_zero() {
            bail!("acquisition period must be at least 1 ms");
        }
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            bail!("acquisition already active");
        }

        let handle = tokio::spawn(acquisition_loop(
            worker,
            period,
            self.recording_tx.subscribe(),
            self.cancel_token.clone(),
        ));
        *guard = Some(handle);
        Ok(())
    }

    pub fn recording(&self) -> RecordingState {
        *self.recording_tx.borrow()
    }

    pub fn set_recording(&self, state: RecordingState) {
        self.recording_tx.send_replace(state);
    }

    /// Flips between Idle and Recording and returns the new state.
    pub fn toggle_recording(&self) -> RecordingState {
        let mut next = RecordingState::Idle;
        self.recording_tx.send_modify(|state| {
            *state = state.toggled();
            next = *state;
        });
        next
    }

    /// Stops the loop and saves the configuration.
    ///
    /// Returns the final loop status for the first caller and `None` for
    /// every later one. Settings are saved even when the loop task failed;
    /// the join error is reported after that.
    pub async fn shutdown(&self) -> Result<Option<LiveStatus>> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        info!("Shutting down acquisition");
        self.cancel_token.cancel();

        let handle = self.handle.lock().await.take();
        let joined = match handle {
            Some(handle) => Some(handle.await),
            None => {
                warn!("Shutdown requested before acquisition started");
                None
            }
        };

        let saved = self
            .settings
            .save()
            .context("failed to save settings on shutdown");

        let status = match joined {
            Some(Ok(worker)) => Some(worker.status().clone()),
            Some(Err(err)) => {
                if let Err(save_err) = &saved {
                    error!("{save_err:#}");
                }
                return Err(err).context("acquisition task failed to join");
            }
            None => None,
        };
        saved?;
        Ok(status)
    }
}

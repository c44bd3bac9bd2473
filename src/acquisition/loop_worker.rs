use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime};
use tokio::sync::watch;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    db::Database,
    sensing::{SharedSource, CHANNELS},
};

use super::state::{LiveHistory, LiveReading, LiveStatus, RecordingState, StoreState};
use super::view::{LiveFrame, LiveView};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Result of one successful tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub reading: LiveReading,
    /// Row id when the reading was stored.
    pub stored_id: Option<i64>,
}

/// State owned by the acquisition task between ticks.
pub struct AcquisitionLoop {
    source: SharedSource,
    store: Option<Database>,
    history: LiveHistory,
    latest: Option<LiveReading>,
    status: LiveStatus,
    view: Box<dyn LiveView>,
    temperature_range: [i32; 2],
}

impl AcquisitionLoop {
    pub fn new(
        source: SharedSource,
        store: Option<Database>,
        store_state: StoreState,
        view: Box<dyn LiveView>,
        history_len: usize,
        temperature_range: [i32; 2],
    ) -> Self {
        let store_state = if store.is_none() {
            StoreState::Unavailable
        } else {
            store_state
        };
        Self {
            source,
            store,
            history: LiveHistory::new(history_len),
            latest: None,
            status: LiveStatus::new(store_state),
            view,
            temperature_range,
        }
    }

    pub fn history(&self) -> &LiveHistory {
        &self.history
    }

    pub fn status(&self) -> &LiveStatus {
        &self.status
    }

    /// Poll, persist when recording, update the history, redraw.
    ///
    /// Only a sensor failure is returned as an error; a failed insert is
    /// logged and shown in the status bar, and the tick still completes.
    pub async fn tick(
        &mut self,
        timestamp: NaiveDateTime,
        recording: RecordingState,
    ) -> Result<TickReport> {
        self.status.recording = recording;

        let values = match poll_source(Arc::clone(&self.source)).await {
            Ok(values) => values,
            Err(err) => {
                self.status.last_error = Some(format!("{err:#}"));
                self.render();
                return Err(err);
            }
        };
        let reading = LiveReading::new(timestamp, values);

        let stored_id = if recording.is_recording() {
            self.persist(&reading).await
        } else {
            None
        };

        self.history.push(values);
        self.latest = Some(reading);
        self.render();

        Ok(TickReport { reading, stored_id })
    }

    /// Redraws with the current state, e.g. after the recording state changed.
    pub fn render(&mut self) {
        let frame = LiveFrame {
            reading: self.latest.as_ref(),
            history: &self.history,
            status: &self.status,
            temperature_range: self.temperature_range,
        };
        self.view.render(&frame);
    }

    pub fn set_recording(&mut self, recording: RecordingState) {
        self.status.recording = recording;
    }

    async fn persist(&mut self, reading: &LiveReading) -> Option<i64> {
        let Some(store) = &self.store else {
            log_warn!("recording is on but no database is available; reading not stored");
            self.status.last_error = Some("no database available, reading not stored".into());
            return None;
        };

        let [t1, t2, t3] = reading.values;
        match store.insert_reading(reading.timestamp, t1, t2, t3).await {
            Ok(id) => {
                self.status.persisted += 1;
                self.status.last_error = None;
                Some(id)
            }
            Err(err) => {
                log_error!("failed to store reading: {err:#}");
                self.status.last_error = Some(format!("{err:#}"));
                None
            }
        }
    }
}

async fn poll_source(source: SharedSource) -> Result<[f64; CHANNELS]> {
    let started = Instant::now();
    let values = tokio::task::spawn_blocking(move || {
        let mut guard = source
            .lock()
            .map_err(|_| anyhow!("sensor source lock poisoned"))?;
        guard.poll().map_err(anyhow::Error::from)
    })
    .await
    .context("sensor worker join failed")??;
    log_debug!("poll took {}ms", started.elapsed().as_millis());
    Ok(values)
}

/// Runs ticks every `period` until `cancel_token` fires, then hands the loop
/// state back so the caller can report on it.
pub async fn acquisition_loop(
    mut worker: AcquisitionLoop,
    period: Duration,
    mut recording: watch::Receiver<RecordingState>,
    cancel_token: CancellationToken,
) -> AcquisitionLoop {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log_info!("acquisition loop started ({}ms period)", period.as_millis());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let state = *recording.borrow();
                let now = Local::now().naive_local();
                if let Err(err) = worker.tick(now, state).await {
                    log_error!("sensor poll failed: {err:#}");
                }
            }
            changed = recording.changed() => {
                if changed.is_err() {
                    log_warn!("recording control dropped; stopping acquisition loop");
                    break;
                }
                let state = *recording.borrow();
                log_info!("{}", state.label());
                worker.set_recording(state);
                worker.render();
            }
            _ = cancel_token.cancelled() => {
                log_info!("acquisition loop shutting down");
                break;
            }
        }
    }

    worker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TableName;
    use crate::error::SensorError;
    use crate::sensing::{SensorSource, SimulatedSource};
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use std::sync::Mutex;

    struct Fixed(Vec<[f64; CHANNELS]>);

    impl SensorSource for Fixed {
        fn poll(&mut self) -> Result<[f64; CHANNELS], SensorError> {
            if self.0.is_empty() {
                return Err(SensorError::TooFewDevices {
                    found: 0,
                    required: CHANNELS,
                });
            }
            Ok(self.0.remove(0))
        }

        fn describe(&self) -> String {
            "fixed".into()
        }
    }

    #[derive(Clone, Default)]
    struct CountingView(Arc<Mutex<Vec<(usize, Option<String>)>>>);

    impl LiveView for CountingView {
        fn render(&mut self, frame: &LiveFrame<'_>) {
            self.0
                .lock()
                .unwrap()
                .push((frame.history.len(), frame.status.last_error.clone()));
        }
    }

    fn shared(source: impl SensorSource + 'static) -> SharedSource {
        let boxed: Box<dyn SensorSource> = Box::new(source);
        Arc::new(Mutex::new(boxed))
    }

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap()
    }

    async fn store() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("live.db"), TableName::parse("temps").unwrap())
            .unwrap();
        db.create_table().await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn only_recording_ticks_are_persisted() {
        let (_dir, db) = store().await;
        let view = CountingView::default();
        let mut worker = AcquisitionLoop::new(
            shared(Fixed(vec![[10.0, 20.0, 30.0], [11.0, 21.0, 31.0], [12.0, 22.0, 32.0]])),
            Some(db.clone()),
            StoreState::Connected,
            Box::new(view.clone()),
            60,
            [0, 50],
        );

        let idle = worker.tick(t0(), RecordingState::Idle).await.unwrap();
        assert_eq!(idle.stored_id, None);
        let rec = worker
            .tick(t0() + ChronoDuration::seconds(1), RecordingState::Recording)
            .await
            .unwrap();
        assert!(rec.stored_id.is_some());
        assert_eq!(rec.reading.average, 21.0);

        assert_eq!(db.count_readings().await.unwrap(), 1);
        assert_eq!(worker.status().persisted, 1);
        assert_eq!(worker.history().len(), 2);
        assert_eq!(view.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sensor_failure_is_reported_and_history_untouched() {
        let view = CountingView::default();
        let mut worker = AcquisitionLoop::new(
            shared(Fixed(Vec::new())),
            None,
            StoreState::Connected,
            Box::new(view.clone()),
            5,
            [0, 50],
        );

        let err = worker.tick(t0(), RecordingState::Idle).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SensorError>(),
            Some(SensorError::TooFewDevices { .. })
        ));
        assert!(worker.history().is_empty());
        assert_eq!(worker.status().store, StoreState::Unavailable);

        let renders = view.0.lock().unwrap();
        assert_eq!(renders.len(), 1);
        assert!(renders[0].1.is_some());
    }

    #[tokio::test]
    async fn failed_insert_does_not_stop_the_tick() {
        let dir = tempfile::tempdir().unwrap();
        // Table never created: every insert fails.
        let db = Database::new(dir.path().join("bare.db"), TableName::parse("temps").unwrap())
            .unwrap();
        let mut worker = AcquisitionLoop::new(
            shared(SimulatedSource::seeded(1)),
            Some(db),
            StoreState::MissingTable,
            Box::new(CountingView::default()),
            5,
            [0, 50],
        );

        let report = worker.tick(t0(), RecordingState::Recording).await.unwrap();
        assert_eq!(report.stored_id, None);
        assert_eq!(worker.history().len(), 1);
        assert!(worker.status().last_error.is_some());
    }

    #[tokio::test]
    async fn history_is_bounded_by_graph_points() {
        let mut worker = AcquisitionLoop::new(
            shared(SimulatedSource::seeded(3)),
            None,
            StoreState::Unavailable,
            Box::new(CountingView::default()),
            4,
            [0, 50],
        );

        let mut polled = Vec::new();
        for i in 0..7 {
            let report = worker
                .tick(t0() + ChronoDuration::seconds(i), RecordingState::Idle)
                .await
                .unwrap();
            polled.push(report.reading.values[0]);
        }

        assert_eq!(worker.history().channel(0), polled[3..].to_vec());
    }

    #[tokio::test]
    async fn loop_stops_on_cancel_and_returns_state() {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(RecordingState::Idle);
        let worker = AcquisitionLoop::new(
            shared(SimulatedSource::seeded(9)),
            None,
            StoreState::Unavailable,
            Box::new(CountingView::default()),
            10,
            [0, 50],
        );

        let handle = tokio::spawn(acquisition_loop(
            worker,
            Duration::from_millis(5),
            rx,
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(RecordingState::Recording).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let worker = handle.await.unwrap();
        assert!(!worker.history().is_empty());
        assert_eq!(worker.status().recording, RecordingState::Recording);
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::Duration;

use crate::{
    db::setup::{ensure_database_setup, StoreSetup},
    sensing::source_for,
    AppState,
};

use super::{
    controller::AcquisitionController,
    loop_worker::AcquisitionLoop,
    state::{LiveStatus, RecordingState, StoreState},
    view::TerminalLiveView,
};

/// What a line typed by the operator asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    ToggleRecording,
    Quit,
    Ignore,
}

pub fn parse_key(line: &str) -> KeyCommand {
    match line.trim().to_ascii_lowercase().as_str() {
        "r" | "record" => KeyCommand::ToggleRecording,
        "q" | "quit" | "exit" => KeyCommand::Quit,
        _ => KeyCommand::Ignore,
    }
}

fn store_state(setup: &StoreSetup) -> StoreState {
    match setup {
        StoreSetup::Ready(_) => StoreState::Connected,
        StoreSetup::MissingTable(_) => StoreState::MissingTable,
        StoreSetup::Unavailable => StoreState::Unavailable,
    }
}

/// `run`: live monitoring until the operator quits or the process is
/// interrupted. Closed stdin only disables the key commands.
pub async fn run_acquisition(state: &AppState, record: bool) -> Result<()> {
    let settings = state.settings.settings();
    let setup = ensure_database_setup(&settings, state.prompt.as_ref()).await?;
    let store = store_state(&setup);

    let source = source_for(&settings);
    if let Ok(guard) = source.lock() {
        info!("Polling {} every {}ms", guard.describe(), settings.update_interval);
    }

    let worker = AcquisitionLoop::new(
        source,
        setup.into_database(),
        store,
        Box::new(TerminalLiveView::new(settings.graph_points, true)),
        settings.graph_points,
        settings.temperature_range,
    );

    let initial = if record {
        RecordingState::Recording
    } else {
        RecordingState::Idle
    };
    let controller = AcquisitionController::new(Arc::clone(&state.settings), initial);
    controller
        .start(worker, Duration::from_millis(settings.update_interval))
        .await?;

    let mut keys = tokio::spawn(read_keys(
        BufReader::new(tokio::io::stdin()),
        controller.clone(),
    ));

    let status = tokio::select! {
        joined = &mut keys => match joined {
            Ok(result) => result?,
            Err(err) => {
                warn!("stdin reader stopped: {err}");
                controller.shutdown().await?
            }
        },
        signal = shutdown_signal() => {
            signal?;
            controller.shutdown().await?
        }
    };
    keys.abort();

    if let Some(status) = status {
        print_summary(&status);
    }
    Ok(())
}

/// Handles operator keys until `q`. End of input (a service manager, cron,
/// `</dev/null`) or a read error only stops key handling; acquisition then
/// runs until a signal arrives.
async fn read_keys<R>(input: R, controller: AcquisitionController) -> Result<Option<LiveStatus>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("End of input; key commands disabled, stop with Ctrl-C or SIGTERM");
                return std::future::pending().await;
            }
            Err(err) => {
                warn!("Failed to read stdin: {err}; key commands disabled");
                return std::future::pending().await;
            }
        };

        match parse_key(&line) {
            KeyCommand::ToggleRecording => {
                let state = controller.toggle_recording();
                info!("{}", state.label());
            }
            KeyCommand::Quit => break,
            KeyCommand::Ignore => {}
        }
    }

    controller.shutdown().await
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")
    };

    #[cfg(unix)]
    let terminate = async {
        let mut stream =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to install SIGTERM handler")?;
        stream.recv().await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            info!("Ctrl-C received");
            result
        }
        result = terminate => {
            info!("Terminate signal received");
            result
        }
    }
}

fn print_summary(status: &LiveStatus) {
    println!(
        "Stopped. {} | {} | stored this run: {}",
        status.store.label(),
        status.recording.label(),
        status.persisted
    );
    if let Some(error) = &status.last_error {
        println!("Last error: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::view::{LiveFrame, LiveView};
    use crate::sensing::{SensorSource, SimulatedSource};
    use crate::settings::{MemoryBackend, SettingsStore};
    use std::sync::Mutex;

    struct Silent;

    impl LiveView for Silent {
        fn render(&mut self, _frame: &LiveFrame<'_>) {}
    }

    async fn started() -> AcquisitionController {
        let settings = SettingsStore::load(Box::new(MemoryBackend::default())).unwrap();
        let controller = AcquisitionController::new(Arc::new(settings), RecordingState::Idle);
        let source: Box<dyn SensorSource> = Box::new(SimulatedSource::seeded(2));
        let worker = AcquisitionLoop::new(
            Arc::new(Mutex::new(source)),
            None,
            StoreState::Unavailable,
            Box::new(Silent),
            10,
            [0, 50],
        );
        controller
            .start(worker, Duration::from_millis(5))
            .await
            .unwrap();
        controller
    }

    #[tokio::test]
    async fn end_of_input_keeps_acquisition_running() {
        let controller = started().await;

        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            read_keys(&b"r\n"[..], controller.clone()),
        )
        .await;
        assert!(waited.is_err(), "closed stdin must not end the run");
        assert_eq!(controller.recording(), RecordingState::Recording);

        // Still running, so the first shutdown is the one that stops it.
        assert!(controller.shutdown().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn quit_key_shuts_down() {
        let controller = started().await;

        let status = read_keys(&b"x\nq\n"[..], controller.clone()).await.unwrap();
        assert!(status.is_some());
        assert!(controller.shutdown().await.unwrap().is_none());
    }

    #[test]
    fn keys_map_to_commands() {
        assert_eq!(parse_key("r"), KeyCommand::ToggleRecording);
        assert_eq!(parse_key(" R \n"), KeyCommand::ToggleRecording);
        assert_eq!(parse_key("q"), KeyCommand::Quit);
        assert_eq!(parse_key("exit"), KeyCommand::Quit);
        assert_eq!(parse_key(""), KeyCommand::Ignore);
        assert_eq!(parse_key("x"), KeyCommand::Ignore);
    }

    #[test]
    fn store_state_follows_setup() {
        assert_eq!(store_state(&StoreSetup::Unavailable), StoreState::Unavailable);
    }
}

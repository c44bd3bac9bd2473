pub mod acquisition;
pub mod chart;
mod config_commands;
pub mod db;
pub mod error;
pub mod history;
mod prompt;
pub mod sensing;
pub mod settings;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};

use db::setup::OperatorPrompt;
use prompt::StdinPrompt;
use settings::SettingsStore;

pub use error::{SensorError, ValidationError};

/// Shared by every command.
pub(crate) struct AppState {
    pub(crate) settings: Arc<SettingsStore>,
    pub(crate) prompt: Box<dyn OperatorPrompt>,
}

/// Monitor, record and review three 1-wire temperature sensors.
#[derive(Parser, Debug)]
#[command(name = "wire-reader")]
#[command(version, about)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = "config.json", env = "WIRE_READER_CONFIG")]
    config: PathBuf,

    /// Answer yes to every setup question
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Live view; press `r` + Enter to toggle recording, `q` + Enter to quit
    Run {
        /// Start with recording enabled
        #[arg(long)]
        record: bool,
    },
    /// Export readings to CSV (the whole table when no range is given)
    Export {
        #[command(flatten)]
        range: RangeArgs,
        /// Output directory (defaults to the configured export_path)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Interactive history view of a stored range
    Plot {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// First and last recorded timestamps
    Range,
    /// Set the comment of a stored reading
    Comment {
        /// Reading id
        #[arg(long, conflicts_with = "at")]
        id: Option<i64>,
        /// Exact timestamp of the reading
        #[arg(long, value_parser = parse_cli_timestamp)]
        at: Option<NaiveDateTime>,
        text: String,
    },
    /// Show or edit settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct RangeArgs {
    /// Range start, `YYYY-MM-DD HH:MM:SS`
    #[arg(long, value_parser = parse_cli_timestamp, requires = "end")]
    start: Option<NaiveDateTime>,
    /// Range end, `YYYY-MM-DD HH:MM:SS`
    #[arg(long, value_parser = parse_cli_timestamp, requires = "start")]
    end: Option<NaiveDateTime>,
    /// The most recent N readings
    #[arg(long, conflicts_with_all = ["start", "end"])]
    last: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Get {
        key: String,
    },
    /// Value is JSON, or plain text for strings
    Set {
        key: String,
        value: String,
    },
    /// Reset one key, or everything when no key is given
    Reset {
        key: Option<String>,
    },
}

fn parse_cli_timestamp(raw: &str) -> Result<NaiveDateTime, String> {
    db::helpers::parse_timestamp(raw, "timestamp").map_err(|err| format!("{err:#}"))
}

async fn dispatch(cli: Cli) -> Result<()> {
    let settings = SettingsStore::open(cli.config.clone())
        .with_context(|| format!("failed to load settings from {}", cli.config.display()))?;
    let state = AppState {
        settings: Arc::new(settings),
        prompt: Box::new(StdinPrompt::new(cli.yes)),
    };

    match cli.command {
        Command::Run { record } => acquisition::commands::run_acquisition(&state, record).await,
        Command::Export { range, out } => {
            let request = history::commands::range_request(range.start, range.end, range.last)?;
            history::commands::export(&state, request, out).await
        }
        Command::Plot { range } => {
            let request = history::commands::range_request(range.start, range.end, range.last)?
                .context("plot needs --start and --end, or --last")?;
            history::commands::plot(&state, request).await
        }
        Command::Range => history::commands::show_range(&state).await,
        Command::Comment { id, at, text } => {
            history::commands::comment(&state, id, at, text).await
        }
        Command::Config { action } => match action {
            ConfigAction::Show => config_commands::show_config(&state),
            ConfigAction::Get { key } => config_commands::get_config(&state, &key),
            ConfigAction::Set { key, value } => {
                config_commands::set_config(&state, &key, &value).await
            }
            ConfigAction::Reset { key } => {
                config_commands::reset_config(&state, key.as_deref()).await
            }
        },
    }
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    log::debug!("wire-reader starting: {cli:?}");

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let result = runtime.block_on(dispatch(cli));
    // A stdin read may still be parked on a blocking thread.
    runtime.shutdown_timeout(Duration::from_millis(200));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_range_flags_and_timestamps() {
        let cli = Cli::try_parse_from([
            "wire-reader",
            "export",
            "--start",
            "2024-05-01 12:00:00",
            "--end",
            "2024-05-01 13:00:00",
            "--out",
            "dumps",
        ])
        .unwrap();
        let Command::Export { range, out } = cli.command else {
            panic!("expected export");
        };
        assert_eq!(
            range.start,
            Some(db::helpers::parse_timestamp("2024-05-01 12:00:00", "t").unwrap())
        );
        assert_eq!(out, Some(PathBuf::from("dumps")));

        assert!(Cli::try_parse_from(["wire-reader", "plot", "--start", "2024-05-01 12:00:00"])
            .is_err());
        assert!(Cli::try_parse_from(["wire-reader", "plot", "--last", "5", "--start", "2024-05-01 12:00:00", "--end", "2024-05-01 13:00:00"])
            .is_err());
        assert!(Cli::try_parse_from(["wire-reader", "comment", "--at", "not a time", "x"]).is_err());
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli =
            Cli::try_parse_from(["wire-reader", "run", "--record", "--yes", "--config", "lab.json"])
                .unwrap();
        assert!(cli.yes);
        assert_eq!(cli.config, PathBuf::from("lab.json"));
        assert!(matches!(cli.command, Command::Run { record: true }));
    }
}

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    chart::ChartSize,
    db::{
        helpers::format_timestamp,
        setup::{ensure_database_setup, StoreSetup},
        Database,
    },
    AppState,
};

use super::{
    filter::{export_request, open_plot, RangeRequest},
    plot::{render_plot_text, HistoryPlot, Series},
};

/// Opens the configured store for the history commands, which need the
/// readings table to exist.
pub async fn open_store(state: &AppState) -> Result<Database> {
    let settings = state.settings.settings();
    match ensure_database_setup(&settings, state.prompt.as_ref()).await? {
        StoreSetup::Ready(db) => Ok(db),
        StoreSetup::MissingTable(_) => bail!(
            "table '{}' does not exist in {}",
            settings.table_name,
            settings.db_path.display()
        ),
        StoreSetup::Unavailable => {
            bail!("database {} is not available", settings.db_path.display())
        }
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Builds a range request from the `--start/--end` or `--last` flags.
pub fn range_request(
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    last: Option<u32>,
) -> Result<Option<RangeRequest>> {
    match (start, end, last) {
        (None, None, None) => Ok(None),
        (Some(start), Some(end), None) => Ok(Some(RangeRequest::Between { start, end })),
        (None, None, Some(n)) => Ok(Some(RangeRequest::LastN(n))),
        (_, _, Some(_)) => bail!("--last cannot be combined with --start/--end"),
        _ => bail!("--start and --end must be given together"),
    }
}

/// `export`: a range (or the whole table) to CSV.
pub async fn export(
    state: &AppState,
    request: Option<RangeRequest>,
    out: Option<PathBuf>,
) -> Result<()> {
    let db = open_store(state).await?;
    let directory = out.unwrap_or_else(|| state.settings.settings().export_path);

    let (path, written) = match request {
        Some(request) => export_request(&db, request, now(), &directory).await?,
        None => {
            let path = directory.join(format!(
                "{}_{}.csv",
                db.table().as_str(),
                now().format("%Y%m%d_%H%M%S")
            ));
            let written = db.export_all(path.clone()).await?;
            (path, written)
        }
    };

    println!("Exported {written} readings to {}", path.display());
    Ok(())
}

/// `range`: first and last recorded timestamps and the row count.
pub async fn show_range(state: &AppState) -> Result<()> {
    let db = open_store(state).await?;
    let count = db.count_readings().await?;
    match db.date_range().await? {
        Some(range) => println!(
            "{} .. {} ({count} readings in {})",
            format_timestamp(&range.start),
            format_timestamp(&range.end),
            db.table().as_str()
        ),
        None => println!("No readings recorded in {}", db.table().as_str()),
    }
    Ok(())
}

/// `comment`: by id, or by exact timestamp when that is unambiguous.
pub async fn comment(
    state: &AppState,
    id: Option<i64>,
    at: Option<NaiveDateTime>,
    text: String,
) -> Result<()> {
    let db = open_store(state).await?;
    match (id, at) {
        (Some(id), None) => {
            db.update_comment(id, text).await?;
            println!("Comment stored on reading {id}");
        }
        (None, Some(timestamp)) => {
            db.update_comment_at(timestamp, text).await?;
            println!("Comment stored on reading at {}", format_timestamp(&timestamp));
        }
        _ => bail!("give exactly one of --id or --at"),
    }
    Ok(())
}

/// A line typed into the history view.
#[derive(Debug, Clone, PartialEq)]
pub enum PlotCommand {
    Pick { x: f64, y: f64 },
    Row(usize),
    Hover { x: f64, y: f64 },
    Toggle(Series),
    Comments,
    Comment(String),
    Clear,
    Refresh,
    Export,
    Help,
    Quit,
}

pub const PLOT_HELP: &str = "commands: pick <x> <y> | row <n> | hover <x> <y> | toggle <t1|t2|t3|avg> \
| comments | comment <text> | clear | refresh | export | quit   (x = seconds from range start, y = °C)";

pub fn parse_plot_command(line: &str) -> Result<PlotCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let point = |rest: &str| -> Result<(f64, f64)> {
        let mut parts = rest.split_whitespace();
        let (Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next()) else {
            bail!("expected two numbers: <x> <y>");
        };
        Ok((
            x.parse().with_context(|| format!("invalid x '{x}'"))?,
            y.parse().with_context(|| format!("invalid y '{y}'"))?,
        ))
    };

    Ok(match word.to_ascii_lowercase().as_str() {
        "pick" => {
            let (x, y) = point(rest)?;
            PlotCommand::Pick { x, y }
        }
        "hover" => {
            let (x, y) = point(rest)?;
            PlotCommand::Hover { x, y }
        }
        "row" => PlotCommand::Row(
            rest.parse()
                .with_context(|| format!("invalid row '{rest}'"))?,
        ),
        "toggle" => match Series::parse(rest) {
            Some(series) => PlotCommand::Toggle(series),
            None => bail!("unknown series '{rest}'"),
        },
        "comments" => PlotCommand::Comments,
        "comment" => PlotCommand::Comment(rest.to_string()),
        "clear" => PlotCommand::Clear,
        "refresh" => PlotCommand::Refresh,
        "export" => PlotCommand::Export,
        "help" | "?" => PlotCommand::Help,
        "quit" | "q" | "exit" => PlotCommand::Quit,
        other => bail!("unknown command '{other}'"),
    })
}

/// Applies one command and returns the text to show, or `None` on quit.
pub async fn apply_plot_command(
    plot: &mut HistoryPlot,
    command: PlotCommand,
    export_dir: &std::path::Path,
) -> Result<Option<String>> {
    let message = match command {
        PlotCommand::Pick { x, y } => match plot.pick(x, y) {
            Some(id) => format!("selected reading {id}"),
            None => "nothing near; selection cleared".to_string(),
        },
        PlotCommand::Row(row) => match plot.select_row(row) {
            Some(id) => format!("selected reading {id}"),
            None => format!("no row {row}"),
        },
        PlotCommand::Hover { x, y } => match plot.hover(x, y) {
            Some(tip) => format!(
                "{} {}: {:.2} °C {}",
                tip.timestamp,
                tip.series.label(),
                tip.value,
                tip.comment
            )
            .trim_end()
            .to_string(),
            None => "nothing near".to_string(),
        },
        PlotCommand::Toggle(series) => {
            let visible = plot.toggle_series(series);
            format!("{} {}", series.label(), if visible { "shown" } else { "hidden" })
        }
        PlotCommand::Comments => {
            let shown = plot.toggle_comments();
            format!("comments {}", if shown { "shown" } else { "hidden" })
        }
        PlotCommand::Comment(text) => {
            plot.update_selected_comment(&text).await?;
            "comment stored".to_string()
        }
        PlotCommand::Clear => {
            plot.clear_selection();
            "selection cleared".to_string()
        }
        PlotCommand::Refresh => {
            plot.refresh().await?;
            format!("{} readings", plot.readings().len())
        }
        PlotCommand::Export => {
            let (path, written) = plot.export(export_dir).await?;
            format!("exported {written} readings to {}", path.display())
        }
        PlotCommand::Help => PLOT_HELP.to_string(),
        PlotCommand::Quit => return Ok(None),
    };
    Ok(Some(message))
}

/// `plot`: opens the history view and drives it from stdin.
pub async fn plot(state: &AppState, request: RangeRequest) -> Result<()> {
    let settings = state.settings.settings();
    let db = open_store(state).await?;
    let mut plot = open_plot(db, request, now(), settings.temperature_range).await?;
    let size = ChartSize {
        width: settings.graph_points,
        ..ChartSize::default()
    };

    println!(
        "{}",
        render_plot_text(&plot.render(), settings.temperature_range, size)
    );
    println!("{PLOT_HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_plot_command(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("{err:#}");
                continue;
            }
        };
        match apply_plot_command(&mut plot, command, &settings.export_path).await {
            Ok(Some(message)) => {
                println!(
                    "{}",
                    render_plot_text(&plot.render(), settings.temperature_range, size)
                );
                println!("{message}");
            }
            Ok(None) => break,
            Err(err) => println!("error: {err:#}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DateRange, TableName};
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap()
    }

    #[test]
    fn parses_plot_commands() {
        assert_eq!(
            parse_plot_command("pick 120 21.5").unwrap(),
            PlotCommand::Pick { x: 120.0, y: 21.5 }
        );
        assert_eq!(parse_plot_command("row 3").unwrap(), PlotCommand::Row(3));
        assert_eq!(
            parse_plot_command("toggle avg").unwrap(),
            PlotCommand::Toggle(Series::Average)
        );
        assert_eq!(
            parse_plot_command("comment heater on").unwrap(),
            PlotCommand::Comment("heater on".into())
        );
        assert_eq!(parse_plot_command("q").unwrap(), PlotCommand::Quit);
        assert!(parse_plot_command("pick 1").is_err());
        assert!(parse_plot_command("toggle t9").is_err());
        assert!(parse_plot_command("dance").is_err());
    }

    #[test]
    fn range_flags_must_be_consistent() {
        assert_eq!(range_request(None, None, None).unwrap(), None);
        assert_eq!(
            range_request(None, None, Some(5)).unwrap(),
            Some(RangeRequest::LastN(5))
        );
        assert!(range_request(Some(t0()), None, None).is_err());
        assert!(range_request(Some(t0()), Some(t0()), Some(1)).is_err());
    }

    #[tokio::test]
    async fn plot_session_selects_comments_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("p.db"), TableName::parse("temps").unwrap())
            .unwrap();
        db.create_table().await.unwrap();
        for i in 0..3 {
            db.insert_reading(t0() + Duration::minutes(i), 20.0, 22.0, 24.0)
                .await
                .unwrap();
        }
        let range = DateRange {
            start: t0(),
            end: t0() + Duration::minutes(2),
        };
        let mut plot = HistoryPlot::open(db, range, [0, 50]).await.unwrap();
        let out = dir.path().join("exports");

        let msg = apply_plot_command(&mut plot, PlotCommand::Row(1), &out)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, "selected reading 2");

        apply_plot_command(&mut plot, PlotCommand::Comment("fan".into()), &out)
            .await
            .unwrap();
        assert_eq!(plot.readings()[1].comment, "fan");
        assert!(plot.selected().is_none());

        let msg = apply_plot_command(&mut plot, PlotCommand::Hover { x: 60.0, y: 22.0 }, &out)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, "2024-07-01 06:01:00 Temp2: 22.00 °C fan");

        apply_plot_command(&mut plot, PlotCommand::Export, &out)
            .await
            .unwrap();
        assert!(out
            .join("1wire_20240701_060000_20240701_060200.csv")
            .exists());

        assert_eq!(
            apply_plot_command(&mut plot, PlotCommand::Quit, &out)
                .await
                .unwrap(),
            None
        );
    }
}

use std::io::{self, Write};

use log::warn;

use crate::chart::{render_chart, ChartSeries, ChartSize};
use crate::db::helpers::format_timestamp;

use super::state::{LiveHistory, LiveReading, LiveStatus};

/// Everything the main window shows after a tick.
pub struct LiveFrame<'a> {
    pub reading: Option<&'a LiveReading>,
    pub history: &'a LiveHistory,
    pub status: &'a LiveStatus,
    pub temperature_range: [i32; 2],
}

/// Receives a frame after every state change of the acquisition loop.
pub trait LiveView: Send {
    fn render(&mut self, frame: &LiveFrame<'_>);
}

/// Formats a frame: status bar, current values, average and the live chart.
pub fn render_live_frame(frame: &LiveFrame<'_>, size: ChartSize) -> String {
    let status = frame.status;
    let mut out = format!(
        "App: Running | {} | {} | stored this run: {}\n",
        status.store.label(),
        status.recording.label(),
        status.persisted
    );

    match frame.reading {
        Some(reading) => {
            let [t1, t2, t3] = reading.values;
            out.push_str(&format!(
                "Date: {}   Temp 1: {t1}   Temp 2: {t2}   Temp 3: {t3}\n",
                format_timestamp(&reading.timestamp)
            ));
            out.push_str(&format!("Average Temperature: {:.2} °C\n", reading.average));
        }
        None => out.push_str("Waiting for the first reading...\n"),
    }
    if let Some(error) = &status.last_error {
        out.push_str(&format!("Last error: {error}\n"));
    }

    let channels: Vec<Vec<f64>> = (0..3).map(|i| frame.history.channel(i)).collect();
    let series = [
        ChartSeries {
            label: "Temp1",
            glyph: '*',
            values: &channels[0],
        },
        ChartSeries {
            label: "Temp2",
            glyph: 'o',
            values: &channels[1],
        },
        ChartSeries {
            label: "Temp3",
            glyph: '+',
            values: &channels[2],
        },
    ];
    let [min, max] = frame.temperature_range;
    out.push_str(&render_chart(&series, f64::from(min), f64::from(max), size));
    out.push_str(&format!("\nLast {} records\n", frame.history.capacity()));
    out
}

/// Redraws the frame on stdout.
pub struct TerminalLiveView {
    size: ChartSize,
    clear_screen: bool,
    write_failed: bool,
}

impl TerminalLiveView {
    pub fn new(width: usize, clear_screen: bool) -> Self {
        Self {
            size: ChartSize {
                width,
                ..ChartSize::default()
            },
            clear_screen,
            write_failed: false,
        }
    }

    /// Only the first failed write is logged; a closed terminal would
    /// otherwise log once per tick.
    fn draw<W: Write>(&mut self, out: &mut W, frame: &LiveFrame<'_>) {
        let text = render_live_frame(frame, self.size);
        if let Err(err) = self.write_frame(out, &text) {
            if !self.write_failed {
                warn!("Failed to draw live view: {err}");
                self.write_failed = true;
            }
        }
    }

    fn write_frame<W: Write>(&self, out: &mut W, text: &str) -> io::Result<()> {
        if self.clear_screen {
            write!(out, "\x1b[2J\x1b[H")?;
        }
        writeln!(out, "{text}")?;
        writeln!(out, "[r] toggle recording   [q] quit")?;
        out.flush()
    }
}

impl LiveView for TerminalLiveView {
    fn render(&mut self, frame: &LiveFrame<'_>) {
        let mut stdout = io::stdout().lock();
        self.draw(&mut stdout, frame);
    }
}

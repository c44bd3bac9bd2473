//! Snapshot view of a stored range.
//!
//! Plot coordinates: `x` is seconds since the start of the range, `y` is the
//! temperature in °C. Picking and hovering measure distance after scaling
//! both axes to `[0, 1]` (time by the range length, temperature by the
//! configured display range), so a tolerance means the same on either axis.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::info;
use serde::Serialize;

use crate::chart::{render_chart, ChartSeries, ChartSize};
use crate::db::{
    helpers::{format_timestamp, validate_comment},
    suggest_export_name, Database, DateRange, Reading,
};

/// Maximum normalized distance for a pick or hover to hit a point.
pub const PICK_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Series {
    T1,
    T2,
    T3,
    Average,
}

impl Series {
    pub const ALL: [Series; 4] = [Series::T1, Series::T2, Series::T3, Series::Average];

    pub fn label(self) -> &'static str {
        match self {
            Series::T1 => "Temp1",
            Series::T2 => "Temp2",
            Series::T3 => "Temp3",
            Series::Average => "Average",
        }
    }

    pub fn glyph(self) -> char {
        match self {
            Series::T1 => '*',
            Series::T2 => 'o',
            Series::T3 => '+',
            Series::Average => '#',
        }
    }

    pub fn value(self, reading: &Reading) -> f64 {
        match self {
            Series::T1 => reading.t1,
            Series::T2 => reading.t2,
            Series::T3 => reading.t3,
            Series::Average => reading.average,
        }
    }

    pub fn parse(raw: &str) -> Option<Series> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "t1" | "temp1" | "1" => Some(Series::T1),
            "t2" | "temp2" | "2" => Some(Series::T2),
            "t3" | "temp3" | "3" => Some(Series::T3),
            "avg" | "average" | "a" => Some(Series::Average),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tooltip {
    pub id: i64,
    pub timestamp: String,
    pub series: Series,
    pub value: f64,
    pub comment: String,
}

/// A point drawn on top of a series, in plot coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub series: Series,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub x: f64,
    pub y: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotRow {
    pub index: usize,
    pub reading: Reading,
    pub selected: bool,
}

/// Everything a front end needs to draw the history window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotFrame {
    pub range: DateRange,
    pub visible: Vec<Series>,
    pub rows: Vec<PlotRow>,
    pub selected_id: Option<i64>,
    /// One marker per visible series for the selected reading.
    pub highlights: Vec<Marker>,
    pub annotations: Vec<Annotation>,
}

pub struct HistoryPlot {
    db: Database,
    range: DateRange,
    temperature_range: [i32; 2],
    readings: Vec<Reading>,
    visible: BTreeSet<Series>,
    selected: Option<i64>,
    show_comments: bool,
}

impl HistoryPlot {
    /// Loads `[range.start, range.end]` from the store.
    pub async fn open(db: Database, range: DateRange, temperature_range: [i32; 2]) -> Result<Self> {
        let mut plot = Self {
            db,
            range,
            temperature_range,
            readings: Vec::new(),
            visible: Series::ALL.into_iter().collect(),
            selected: None,
            show_comments: false,
        };
        plot.refresh().await?;
        Ok(plot)
    }

    /// Re-queries the range. A selection survives only if its reading is
    /// still part of the range.
    pub async fn refresh(&mut self) -> Result<()> {
        self.readings = self.db.query_range(self.range.start, self.range.end).await?;
        if let Some(id) = self.selected {
            if self.index_of(id).is_none() {
                self.selected = None;
            }
        }
        info!(
            "History plot loaded {} readings for {} .. {}",
            self.readings.len(),
            format_timestamp(&self.range.start),
            format_timestamp(&self.range.end)
        );
        Ok(())
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn is_visible(&self, series: Series) -> bool {
        self.visible.contains(&series)
    }

    pub fn set_visible(&mut self, series: Series, visible: bool) {
        if visible {
            self.visible.insert(series);
        } else {
            self.visible.remove(&series);
        }
    }

    /// Returns the new visibility.
    pub fn toggle_series(&mut self, series: Series) -> bool {
        let visible = !self.is_visible(series);
        self.set_visible(series, visible);
        visible
    }

    pub fn show_comments(&self) -> bool {
        self.show_comments
    }

    pub fn toggle_comments(&mut self) -> bool {
        self.show_comments = !self.show_comments;
        self.show_comments
    }

    pub fn selected(&self) -> Option<&Reading> {
        self.selected
            .and_then(|id| self.index_of(id))
            .map(|index| &self.readings[index])
    }

    pub fn selected_row(&self) -> Option<usize> {
        self.selected.and_then(|id| self.index_of(id))
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Selects the reading nearest to a click. A click away from every
    /// visible point clears the selection.
    pub fn pick(&mut self, x: f64, y: f64) -> Option<i64> {
        self.selected = self.nearest(x, y).map(|(index, _)| self.readings[index].id);
        self.selected
    }

    /// Selects the reading shown in table row `row`.
    pub fn select_row(&mut self, row: usize) -> Option<i64> {
        self.selected = self.readings.get(row).map(|reading| reading.id);
        self.selected
    }

    /// Tooltip for the point under the cursor; does not touch the selection.
    pub fn hover(&self, x: f64, y: f64) -> Option<Tooltip> {
        let (index, series) = self.nearest(x, y)?;
        let reading = &self.readings[index];
        Some(Tooltip {
            id: reading.id,
            timestamp: format_timestamp(&reading.timestamp),
            series,
            value: series.value(reading),
            comment: reading.comment.clone(),
        })
    }

    /// Stores `comment` on the selected reading, then reloads the range with
    /// nothing selected.
    pub async fn update_selected_comment(&mut self, comment: &str) -> Result<()> {
        let id = self
            .selected
            .ok_or_else(|| anyhow!("select a reading before editing its comment"))?;
        validate_comment(comment)?;

        self.db.update_comment(id, comment.to_string()).await?;
        self.selected = None;
        self.refresh().await
    }

    /// Writes the plot's range to `directory` under the suggested file name.
    pub async fn export(&self, directory: &Path) -> Result<(PathBuf, u64)> {
        let path = directory.join(suggest_export_name(&self.range.start, &self.range.end));
        let written = self
            .db
            .export_range(self.range.start, self.range.end, path.clone())
            .await?;
        Ok((path, written))
    }

    pub fn x_of(&self, reading: &Reading) -> f64 {
        (reading.timestamp - self.range.start).num_milliseconds() as f64 / 1000.0
    }

    pub fn render(&self) -> PlotFrame {
        let selected_index = self.selected_row();
        let visible: Vec<Series> = self.visible.iter().copied().collect();

        let highlights = selected_index
            .map(|index| {
                let reading = &self.readings[index];
                visible
                    .iter()
                    .map(|&series| Marker {
                        series,
                        x: self.x_of(reading),
                        y: series.value(reading),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let annotations = if self.show_comments {
            self.readings
                .iter()
                .filter(|reading| !reading.comment.is_empty())
                .map(|reading| Annotation {
                    x: self.x_of(reading),
                    y: reading.average,
                    text: reading.comment.clone(),
                })
                .collect()
        } else {
            Vec::new()
        };

        PlotFrame {
            range: self.range,
            visible,
            rows: self
                .readings
                .iter()
                .enumerate()
                .map(|(index, reading)| PlotRow {
                    index,
                    reading: reading.clone(),
                    selected: Some(index) == selected_index,
                })
                .collect(),
            selected_id: self.selected,
            highlights,
            annotations,
        }
    }

    fn index_of(&self, id: i64) -> Option<usize> {
        self.readings.iter().position(|reading| reading.id == id)
    }

    fn nearest(&self, x: f64, y: f64) -> Option<(usize, Series)> {
        let x_span = ((self.range.end - self.range.start).num_milliseconds() as f64 / 1000.0)
            .max(1.0);
        let [min, max] = self.temperature_range;
        let y_span = f64::from(max - min).max(1.0);

        let mut best: Option<(usize, Series, f64)> = None;
        for (index, reading) in self.readings.iter().enumerate() {
            let dx = (self.x_of(reading) - x) / x_span;
            for &series in &self.visible {
                let dy = (series.value(reading) - y) / y_span;
                let distance = dx.hypot(dy);
                if distance <= PICK_TOLERANCE
                    && best.map_or(true, |(_, _, closest)| distance < closest)
                {
                    best = Some((index, series, distance));
                }
            }
        }
        best.map(|(index, series, _)| (index, series))
    }
}

/// Text rendering of a frame: chart, then the table with the selected row
/// marked and, when enabled, the comment annotations.
pub fn render_plot_text(frame: &PlotFrame, temperature_range: [i32; 2], size: ChartSize) -> String {
    let columns: Vec<(Series, Vec<f64>)> = frame
        .visible
        .iter()
        .map(|&series| {
            (
                series,
                frame
                    .rows
                    .iter()
                    .map(|row| series.value(&row.reading))
                    .collect(),
            )
        })
        .collect();
    let series: Vec<ChartSeries<'_>> = columns
        .iter()
        .map(|(series, values)| ChartSeries {
            label: series.label(),
            glyph: series.glyph(),
            values,
        })
        .collect();

    let [min, max] = temperature_range;
    let mut out = format!(
        "History {} .. {} ({} readings)\n",
        format_timestamp(&frame.range.start),
        format_timestamp(&frame.range.end),
        frame.rows.len()
    );
    out.push_str(&render_chart(&series, f64::from(min), f64::from(max), size));
    out.push('\n');

    let _ = writeln!(
        out,
        "  {:>4} {:>6}  {:<19} {:>7} {:>7} {:>7} {:>7}  comment",
        "row", "id", "timestamp", "t1", "t2", "t3", "avg"
    );
    for row in &frame.rows {
        let reading = &row.reading;
        let _ = writeln!(
            out,
            "{} {:>4} {:>6}  {:<19} {:>7.2} {:>7.2} {:>7.2} {:>7.2}  {}",
            if row.selected { '>' } else { ' ' },
            row.index,
            reading.id,
            format_timestamp(&reading.timestamp),
            reading.t1,
            reading.t2,
            reading.t3,
            reading.average,
            reading.comment
        );
    }

    for marker in &frame.highlights {
        let _ = writeln!(
            out,
            "selected {} at x={:.0}s: {:.2} °C",
            marker.series.label(),
            marker.x,
            marker.y
        );
    }
    for note in &frame.annotations {
        let _ = writeln!(out, "note at x={:.0}s ({:.2} °C): {}", note.x, note.y, note.text);
    }
    out
}

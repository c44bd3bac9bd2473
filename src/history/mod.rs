//! Review of stored readings: range selection, the history plot, comments
//! and CSV export.

pub(crate) mod commands;
pub mod filter;
pub mod plot;

pub use filter::{export_request, open_plot, RangeRequest};
pub use plot::{HistoryPlot, PlotFrame, Series, Tooltip};

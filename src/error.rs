//! Typed failures that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error`; these types are attached to it
//! and recovered with `downcast_ref` where the distinction matters (a rejected
//! comment is reported to the operator, a dropped connection is only logged).

use std::path::PathBuf;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::db::helpers::format_timestamp;

/// Operator input that was rejected before anything was written.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("comment is {length} characters long (maximum {max})")]
    CommentTooLong { length: usize, max: usize },

    #[error("invalid table name '{0}': use letters, digits and '_' only")]
    InvalidTableName(String),

    #[error("start {} must be earlier than end {}", format_timestamp(.start), format_timestamp(.end))]
    StartNotBeforeEnd {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("start {} is earlier than the first recorded reading {}", format_timestamp(.start), format_timestamp(.first))]
    StartBeforeFirstReading {
        start: NaiveDateTime,
        first: NaiveDateTime,
    },

    #[error("end {} is later than now ({})", format_timestamp(.end), format_timestamp(.now))]
    EndInFuture {
        end: NaiveDateTime,
        now: NaiveDateTime,
    },

    #[error("no readings have been recorded yet")]
    NoData,

    #[error("record count must be at least 1")]
    InvalidCount,

    #[error("{count} readings share timestamp {timestamp}; update by id instead")]
    AmbiguousTimestamp { timestamp: String, count: usize },

    #[error("no reading matches {0}")]
    NotFound(String),

    #[error("invalid value for setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },
}

/// Sensor failures. None of these may be turned into a reading of zero.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("no temperature sensors found under {}", .dir.display())]
    NoDevices { dir: PathBuf },

    #[error("found {found} temperature sensors, {required} are required")]
    TooFewDevices { found: usize, required: usize },

    #[error("sensor {device} did not report a valid reading after {attempts} attempts")]
    NotReady { device: String, attempts: u32 },

    #[error("sensor {device} returned malformed data: {reason}")]
    Malformed { device: String, reason: String },

    #[error("failed to read sensor {device}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },
}

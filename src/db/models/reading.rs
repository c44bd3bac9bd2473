//! Reading data model.
//!
//! One row of the readings table: three channel temperatures captured at the
//! same instant, plus the operator's comment.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A stored reading as returned by range queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
    /// `(t1 + t2 + t3) / 3`, computed by the query.
    pub average: f64,
    pub comment: String,
}

impl Reading {
    pub fn channels(&self) -> [f64; 3] {
        [self.t1, self.t2, self.t3]
    }
}

/// Inclusive timestamp bounds of a set of readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

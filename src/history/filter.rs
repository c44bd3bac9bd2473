use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDateTime;

use crate::db::{suggest_export_name, Database, DateRange};
use crate::error::ValidationError;

use super::plot::HistoryPlot;

/// A range as the operator asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    Between {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    /// The most recently inserted `n` readings.
    LastN(u32),
}

impl RangeRequest {
    /// Checks that need no store: an explicit range must run forwards and
    /// a count must be positive.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            RangeRequest::Between { start, end } if start >= end => {
                Err(ValidationError::StartNotBeforeEnd { start, end })
            }
            RangeRequest::LastN(0) => Err(ValidationError::InvalidCount),
            _ => Ok(()),
        }
    }

    /// Resolves the request against the store.
    ///
    /// An explicit range may not start before the first recorded reading nor
    /// end after `now`.
    pub async fn resolve(&self, db: &Database, now: NaiveDateTime) -> Result<DateRange> {
        self.validate()?;

        match *self {
            RangeRequest::Between { start, end } => {
                let recorded = db.date_range().await?.ok_or(ValidationError::NoData)?;
                if start < recorded.start {
                    return Err(ValidationError::StartBeforeFirstReading {
                        start,
                        first: recorded.start,
                    }
                    .into());
                }
                if end > now {
                    return Err(ValidationError::EndInFuture { end, now }.into());
                }
                Ok(DateRange { start, end })
            }
            RangeRequest::LastN(n) => Ok(db
                .last_n_range(n)
                .await?
                .ok_or(ValidationError::NoData)?),
        }
    }
}

pub async fn open_plot(
    db: Database,
    request: RangeRequest,
    now: NaiveDateTime,
    temperature_range: [i32; 2],
) -> Result<HistoryPlot> {
    let range = request.resolve(&db, now).await?;
    HistoryPlot::open(db, range, temperature_range).await
}

/// Exports the resolved range into `directory` as
/// `1wire_<start>_<end>.csv`. Returns the file and the number of rows.
pub async fn export_request(
    db: &Database,
    request: RangeRequest,
    now: NaiveDateTime,
    directory: &Path,
) -> Result<(PathBuf, u64)> {
    let range = request.resolve(db, now).await?;
    let path = directory.join(suggest_export_name(&range.start, &range.end));
    let written = db.export_range(range.start, range.end, path.clone()).await?;
    Ok((path, written))
}

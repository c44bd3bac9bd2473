use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::info;
use rusqlite::{params, types::Value};

use crate::db::{helpers::format_timestamp, Database, TableName};

/// Column names of the readings table, written as the CSV header.
pub const EXPORT_COLUMNS: [&str; 6] = ["id", "timestamp", "t1", "t2", "t3", "comment"];

/// Default file name for a range export, e.g. `1wire_20240501_120000_20240501_130000.csv`.
pub fn suggest_export_name(start: &NaiveDateTime, end: &NaiveDateTime) -> String {
    format!(
        "1wire_{}_{}.csv",
        start.format("%Y%m%d_%H%M%S"),
        end.format("%Y%m%d_%H%M%S")
    )
}

fn cell(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(v) => v.to_string(),
        Value::Real(v) => v.to_string(),
        Value::Text(v) => v,
        Value::Blob(v) => String::from_utf8_lossy(&v).into_owned(),
    }
}

fn write_csv(
    conn: &rusqlite::Connection,
    table: &TableName,
    filter: Option<(String, String)>,
    destination: &Path,
) -> Result<u64> {
    let columns = EXPORT_COLUMNS.join(", ");
    let mut stmt = match filter {
        Some(_) => conn.prepare(&format!(
            "SELECT {columns} FROM {table} WHERE timestamp BETWEEN ?1 AND ?2 ORDER BY timestamp ASC, id ASC"
        ))?,
        None => conn.prepare(&format!(
            "SELECT {columns} FROM {table} ORDER BY timestamp ASC, id ASC"
        ))?,
    };

    let mut rows = match &filter {
        Some((start, end)) => stmt.query(params![start, end])?,
        None => stmt.query([])?,
    };

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create export directory {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_path(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    writer.write_record(EXPORT_COLUMNS)?;

    let mut written = 0u64;
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(EXPORT_COLUMNS.len());
        for index in 0..EXPORT_COLUMNS.len() {
            record.push(cell(row.get::<_, Value>(index)?));
        }
        writer.write_record(&record)?;
        written += 1;
    }

    writer
        .flush()
        .with_context(|| format!("failed to flush {}", destination.display()))?;
    Ok(written)
}

impl Database {
    /// Writes the readings of `[start, end]` to `destination` as CSV.
    /// Returns the number of data rows written.
    pub async fn export_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        destination: PathBuf,
    ) -> Result<u64> {
        let table = self.table().clone();
        let path = destination.clone();
        let written = self
            .execute(move |conn| {
                write_csv(
                    conn,
                    &table,
                    Some((format_timestamp(&start), format_timestamp(&end))),
                    &path,
                )
            })
            .await?;

        info!("Exported {written} readings to {}", destination.display());
        Ok(written)
    }

    /// Dumps the whole table to `destination` as CSV.
    pub async fn export_all(&self, destination: PathBuf) -> Result<u64> {
        let table = self.table().clone();
        let path = destination.clone();
        let written = self
            .execute(move |conn| write_csv(conn, &table, None, &path))
            .await?;

        info!("Exported {written} readings to {}", destination.display());
        Ok(written)
    }
}

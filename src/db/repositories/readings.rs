use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, Row};

use crate::db::{
    helpers::{format_timestamp, parse_optional_timestamp, parse_timestamp, validate_comment},
    models::{DateRange, Reading},
    Database,
};
use crate::error::ValidationError;

pub(crate) fn row_to_reading(row: &Row) -> Result<Reading> {
    let timestamp: String = row.get("timestamp")?;

    Ok(Reading {
        id: row.get("id")?,
        timestamp: parse_timestamp(&timestamp, "timestamp")?,
        t1: row.get("t1")?,
        t2: row.get("t2")?,
        t3: row.get("t3")?,
        average: row.get("average")?,
        comment: row.get("comment")?,
    })
}

fn bounds_from(min: Option<String>, max: Option<String>) -> Result<Option<DateRange>> {
    let start = parse_optional_timestamp(min, "minimum timestamp")?;
    let end = parse_optional_timestamp(max, "maximum timestamp")?;
    Ok(start.zip(end).map(|(start, end)| DateRange { start, end }))
}

impl Database {
    /// Appends one reading. The comment starts empty. Returns the new row id.
    pub async fn insert_reading(
        &self,
        timestamp: NaiveDateTime,
        t1: f64,
        t2: f64,
        t3: f64,
    ) -> Result<i64> {
        let table = self.table().clone();
        self.execute(move |conn| {
            conn.execute(
                &format!("INSERT INTO {table} (timestamp, t1, t2, t3) VALUES (?1, ?2, ?3, ?4)"),
                params![format_timestamp(&timestamp), t1, t2, t3],
            )
            .with_context(|| "failed to insert reading")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Readings with `start <= timestamp <= end`, oldest first.
    pub async fn query_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Reading>> {
        let table = self.table().clone();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, timestamp,
                        CAST(t1 AS REAL) AS t1,
                        CAST(t2 AS REAL) AS t2,
                        CAST(t3 AS REAL) AS t3,
                        (t1 + t2 + t3) / 3.0 AS average,
                        comment
                 FROM {table}
                 WHERE timestamp BETWEEN ?1 AND ?2
                 ORDER BY timestamp ASC, id ASC"
            ))?;

            let mut rows = stmt.query(params![format_timestamp(&start), format_timestamp(&end)])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_reading(row)?);
            }

            Ok(readings)
        })
        .await
    }

    /// Timestamp bounds of the whole table, `None` when it holds no rows.
    pub async fn date_range(&self) -> Result<Option<DateRange>> {
        let table = self.table().clone();
        self.execute(move |conn| {
            let (min, max): (Option<String>, Option<String>) = conn.query_row(
                &format!("SELECT MIN(timestamp), MAX(timestamp) FROM {table}"),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            bounds_from(min, max)
        })
        .await
    }

    /// Timestamp bounds of the `n` most recently inserted rows.
    ///
    /// Recency follows insertion order (`id`), not timestamp value; the two
    /// only differ when the wall clock moved backwards while recording.
    pub async fn last_n_range(&self, n: u32) -> Result<Option<DateRange>> {
        if n == 0 {
            return Err(ValidationError::InvalidCount.into());
        }

        let table = self.table().clone();
        self.execute(move |conn| {
            let (min, max): (Option<String>, Option<String>) = conn.query_row(
                &format!(
                    "SELECT MIN(timestamp), MAX(timestamp)
                     FROM (SELECT timestamp FROM {table} ORDER BY id DESC LIMIT ?1)"
                ),
                params![n],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            bounds_from(min, max)
        })
        .await
    }

    /// Replaces the comment of the reading with the given id.
    pub async fn update_comment(&self, id: i64, comment: String) -> Result<()> {
        validate_comment(&comment)?;

        let table = self.table().clone();
        self.execute(move |conn| {
            let rows_affected = conn
                .execute(
                    &format!("UPDATE {table} SET comment = ?1 WHERE id = ?2"),
                    params![comment, id],
                )
                .with_context(|| "failed to update comment")?;

            if rows_affected == 0 {
                return Err(ValidationError::NotFound(format!("id {id}")).into());
            }
            Ok(())
        })
        .await
    }

    /// Replaces the comment of the reading stored at exactly `timestamp`.
    ///
    /// Refuses to guess when several readings share the timestamp; nothing is
    /// changed in that case and the caller should use [`Database::update_comment`].
    pub async fn update_comment_at(&self, timestamp: NaiveDateTime, comment: String) -> Result<()> {
        validate_comment(&comment)?;

        let table = self.table().clone();
        let key = format_timestamp(&timestamp);
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT id FROM {table} WHERE timestamp = ?1"))?;
            let ids = stmt
                .query_map(params![key], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            match ids.as_slice() {
                [] => Err(ValidationError::NotFound(format!("timestamp {key}")).into()),
                [id] => {
                    conn.execute(
                        &format!("UPDATE {table} SET comment = ?1 WHERE id = ?2"),
                        params![comment, id],
                    )
                    .with_context(|| "failed to update comment")?;
                    Ok(())
                }
                many => Err(ValidationError::AmbiguousTimestamp {
                    timestamp: key,
                    count: many.len(),
                }
                .into()),
            }
        })
        .await
    }

    pub async fn count_readings(&self) -> Result<u64> {
        let table = self.table().clone();
        self.execute(move |conn| {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TableName;
    use chrono::{Duration, NaiveDate};
    use tempfile::TempDir;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    async fn open_store() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("readings.db"), TableName::parse("temps").unwrap())
            .unwrap();
        db.create_table().await.unwrap();
        (dir, db)
    }

    fn validation(err: &anyhow::Error) -> Option<&ValidationError> {
        err.downcast_ref::<ValidationError>()
    }

    #[tokio::test]
    async fn inserted_reading_comes_back_with_empty_comment() {
        let (_dir, db) = open_store().await;
        let id = db.insert_reading(t0(), 21.5, 22.25, 23.0).await.unwrap();

        let rows = db.query_range(t0(), t0()).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.id, id);
        assert_eq!(row.timestamp, t0());
        assert_eq!(row.channels(), [21.5, 22.25, 23.0]);
        assert_eq!(row.comment, "");
    }

    #[tokio::test]
    async fn range_query_is_inclusive_ascending_and_averaged() {
        let (_dir, db) = open_store().await;
        // Inserted out of order to check the ORDER BY.
        db.insert_reading(t0() + Duration::seconds(2), 12.0, 22.0, 32.0).await.unwrap();
        db.insert_reading(t0(), 10.0, 20.0, 30.0).await.unwrap();
        db.insert_reading(t0() + Duration::seconds(1), 11.0, 21.0, 31.0).await.unwrap();
        db.insert_reading(t0() + Duration::seconds(3), 1.0, 1.0, 1.0).await.unwrap();

        let rows = db
            .query_range(t0(), t0() + Duration::seconds(2))
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        let averages: Vec<f64> = rows.iter().map(|r| r.average).collect();
        assert_eq!(averages, vec![20.0, 21.0, 22.0]);
        assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn empty_table_has_no_date_range() {
        let (_dir, db) = open_store().await;
        assert_eq!(db.date_range().await.unwrap(), None);
        assert_eq!(db.last_n_range(5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_n_follows_insertion_order() {
        let (_dir, db) = open_store().await;
        for offset in [0, 10, 20] {
            db.insert_reading(t0() + Duration::seconds(offset), 1.0, 2.0, 3.0)
                .await
                .unwrap();
        }
        // Clock jumped back before the last insert.
        db.insert_reading(t0() - Duration::seconds(60), 1.0, 2.0, 3.0)
            .await
            .unwrap();

        let last_two = db.last_n_range(2).await.unwrap().unwrap();
        assert_eq!(last_two.start, t0() - Duration::seconds(60));
        assert_eq!(last_two.end, t0() + Duration::seconds(20));
    }

    #[tokio::test]
    async fn last_n_beyond_row_count_matches_full_range() {
        let (_dir, db) = open_store().await;
        for offset in [0, 5, 9] {
            db.insert_reading(t0() + Duration::seconds(offset), 1.0, 2.0, 3.0)
                .await
                .unwrap();
        }

        assert_eq!(
            db.last_n_range(100).await.unwrap(),
            db.date_range().await.unwrap()
        );
        let err = db.last_n_range(0).await.unwrap_err();
        assert_eq!(validation(&err), Some(&ValidationError::InvalidCount));
    }

    #[tokio::test]
    async fn overlong_comment_is_rejected_and_nothing_changes() {
        let (_dir, db) = open_store().await;
        let id = db.insert_reading(t0(), 1.0, 2.0, 3.0).await.unwrap();
        db.update_comment(id, "calibrated".into()).await.unwrap();

        let err = db.update_comment(id, "x".repeat(251)).await.unwrap_err();
        assert!(matches!(
            validation(&err),
            Some(ValidationError::CommentTooLong { length: 251, .. })
        ));
        let err = db.update_comment_at(t0(), "y".repeat(300)).await.unwrap_err();
        assert!(matches!(validation(&err), Some(ValidationError::CommentTooLong { .. })));

        let rows = db.query_range(t0(), t0()).await.unwrap();
        assert_eq!(rows[0].comment, "calibrated");
    }

    #[tokio::test]
    async fn comment_by_timestamp_refuses_duplicates() {
        let (_dir, db) = open_store().await;
        db.insert_reading(t0(), 1.0, 2.0, 3.0).await.unwrap();
        db.insert_reading(t0(), 4.0, 5.0, 6.0).await.unwrap();
        let single = t0() + Duration::seconds(1);
        db.insert_reading(single, 7.0, 8.0, 9.0).await.unwrap();

        let err = db.update_comment_at(t0(), "door open".into()).await.unwrap_err();
        assert!(matches!(
            validation(&err),
            Some(ValidationError::AmbiguousTimestamp { count: 2, .. })
        ));

        db.update_comment_at(single, "door open".into()).await.unwrap();
        let err = db
            .update_comment_at(t0() + Duration::hours(1), "none".into())
            .await
            .unwrap_err();
        assert!(matches!(validation(&err), Some(ValidationError::NotFound(_))));

        let rows = db.query_range(t0(), single).await.unwrap();
        let comments: Vec<&str> = rows.iter().map(|r| r.comment.as_str()).collect();
        assert_eq!(comments, vec!["", "", "door open"]);
    }

    #[tokio::test]
    async fn update_by_unknown_id_is_not_found() {
        let (_dir, db) = open_store().await;
        let err = db.update_comment(42, "hello".into()).await.unwrap_err();
        assert!(matches!(validation(&err), Some(ValidationError::NotFound(_))));
        assert_eq!(db.count_readings().await.unwrap(), 0);
    }
}

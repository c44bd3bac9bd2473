use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction};

use super::helpers::TableName;

/// Schema steps for one readings table, oldest first.
///
/// Several tables can live in one database file, so progress is not tracked
/// in `user_version`; every step is written to be idempotent and the whole
/// list is applied on each `create_table`.
const SCHEMA_STEPS: [(&str, &str); 2] = [
    ("readings_v1.sql", include_str!("schemas/readings_v1.sql")),
    ("readings_v2.sql", include_str!("schemas/readings_v2.sql")),
];

pub fn run_migrations(conn: &mut Connection, table: &TableName) -> Result<()> {
    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    for (name, template) in SCHEMA_STEPS {
        apply_step(&tx, table, template).with_context(|| format!("failed to execute {name}"))?;
    }

    tx.commit().context("failed to commit migrations")?;
    Ok(())
}

fn apply_step(tx: &Transaction<'_>, table: &TableName, template: &str) -> Result<()> {
    let index = format!("\"idx_{}_timestamp\"", table.as_str());
    let sql = template
        .replace("{table}", &table.to_string())
        .replace("{index}", &index);
    tx.execute_batch(&sql)?;
    Ok(())
}

pub fn table_exists(conn: &Connection, table: &TableName) -> Result<bool> {
    let found: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table.as_str()],
            |row| row.get(0),
        )
        .context("failed to inspect sqlite_master")?;
    Ok(found > 0)
}

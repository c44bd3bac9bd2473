//! Startup verification of the configured store.
//!
//! The store is inspected without creating anything. When the file or the
//! table is missing the operator decides whether to create it; declining is
//! not an error, the application just runs without persistence.

use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use rusqlite::{Connection, OpenFlags};

use super::{migrations::table_exists, Database, TableName};
use crate::settings::Settings;

/// What the operator is asked to confirm, or warned about.
pub trait OperatorPrompt {
    fn confirm(&self, question: &str) -> bool;
    fn warn(&self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Ready,
    MissingFile,
    MissingTable,
}

/// Result of [`ensure_database_setup`].
pub enum StoreSetup {
    /// Store and table exist (possibly just created).
    Ready(Database),
    /// Operator declined to create the table; the file is open but every
    /// readings statement will fail until the table exists.
    MissingTable(Database),
    /// Operator declined to create the file; nothing is persisted.
    Unavailable,
}

impl StoreSetup {
    pub fn database(&self) -> Option<&Database> {
        match self {
            StoreSetup::Ready(db) | StoreSetup::MissingTable(db) => Some(db),
            StoreSetup::Unavailable => None,
        }
    }

    pub fn into_database(self) -> Option<Database> {
        match self {
            StoreSetup::Ready(db) | StoreSetup::MissingTable(db) => Some(db),
            StoreSetup::Unavailable => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, StoreSetup::Ready(_))
    }
}

pub fn inspect(path: &Path, table: &TableName) -> Result<StoreStatus> {
    if !path.exists() {
        return Ok(StoreStatus::MissingFile);
    }

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {} for inspection", path.display()))?;
    if table_exists(&conn, table)? {
        Ok(StoreStatus::Ready)
    } else {
        Ok(StoreStatus::MissingTable)
    }
}

pub async fn ensure_database_setup(
    settings: &Settings,
    prompt: &dyn OperatorPrompt,
) -> Result<StoreSetup> {
    let table = TableName::parse(&settings.table_name)?;
    let path = settings.db_path.clone();

    match inspect(&path, &table)? {
        StoreStatus::Ready => {
            let db = Database::new(path, table)?;
            Ok(StoreSetup::Ready(db))
        }
        StoreStatus::MissingFile => {
            let question = format!(
                "The database file '{}' does not exist. Would you like to create it?",
                path.display()
            );
            if !prompt.confirm(&question) {
                warn!("Database {} not created; readings will not be stored", path.display());
                prompt.warn("The application may not function correctly without a valid database.");
                return Ok(StoreSetup::Unavailable);
            }

            let db = Database::new(path, table)?;
            db.create_table().await?;
            info!("Database created at {}", db.path().display());
            Ok(StoreSetup::Ready(db))
        }
        StoreStatus::MissingTable => {
            let db = Database::new(path, table)?;
            let question = format!(
                "The table '{}' does not exist in the database. Would you like to create it?",
                db.table().as_str()
            );
            if !prompt.confirm(&question) {
                warn!("Table {} not created; readings will not be stored", db.table().as_str());
                prompt.warn("The application may not function correctly without the required table.");
                return Ok(StoreSetup::MissingTable(db));
            }

            db.create_table().await?;
            Ok(StoreSetup::Ready(db))
        }
    }
}

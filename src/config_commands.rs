//! `config` subcommands: inspect and edit the settings file.

use anyhow::{bail, Result};
use log::info;
use serde_json::Value;

use crate::{db::setup::ensure_database_setup, settings::Settings, AppState};

/// Interprets a command-line value as JSON when it parses as JSON, as a
/// plain string otherwise, so `set db_path lab.db` needs no quoting.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn show_config(state: &AppState) -> Result<()> {
    let settings = state.settings.settings();
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

pub fn get_config(state: &AppState, key: &str) -> Result<()> {
    match state.settings.get(key) {
        Some(value) => println!("{value}"),
        None => bail!("unknown setting '{key}'"),
    }
    Ok(())
}

pub async fn set_config(state: &AppState, key: &str, raw: &str) -> Result<()> {
    if !Settings::KNOWN_KEYS.contains(&key) {
        info!("Storing unknown setting '{key}' as given");
    }
    let storage_changed = state.settings.set(key, parse_value(raw))?;
    println!("{key} = {}", state.settings.get(key).unwrap_or(Value::Null));
    verify_storage(state, storage_changed).await
}

pub async fn reset_config(state: &AppState, key: Option<&str>) -> Result<()> {
    let storage_changed = match key {
        Some(key) => {
            let changed = state.settings.reset_to_default(key)?;
            println!("{key} reset");
            changed
        }
        None => {
            let changed = state.settings.reset_all()?;
            println!("all settings reset to defaults");
            changed
        }
    };
    verify_storage(state, storage_changed).await
}

/// A new database path or table name is checked right away, offering to
/// create whatever is missing.
async fn verify_storage(state: &AppState, storage_changed: bool) -> Result<()> {
    if !storage_changed {
        return Ok(());
    }
    let settings = state.settings.settings();
    let setup = ensure_database_setup(&settings, state.prompt.as_ref()).await?;
    if setup.is_ready() {
        println!(
            "Using table '{}' in {}",
            settings.table_name,
            settings.db_path.display()
        );
    }
    Ok(())
}

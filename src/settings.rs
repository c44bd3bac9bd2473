use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fs,
    path::PathBuf,
    sync::{Mutex, RwLock},
};

use crate::db::TableName;
use crate::error::ValidationError;

/// Application settings as persisted in `config.json`.
///
/// Keys missing from the file take their built-in default; keys this version
/// does not know are kept in `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    /// Directory exports are written to.
    pub export_path: PathBuf,
    /// Y-axis bounds of the charts, `[min, max]` in °C.
    pub temperature_range: [i32; 2],
    pub table_name: String,
    /// Poll period in milliseconds.
    pub update_interval: u64,
    /// Number of points kept in the live chart.
    pub graph_points: usize,
    /// Use simulated sensors instead of the 1-wire bus.
    pub debug_mode: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("sensor_database.db"),
            export_path: PathBuf::from("exports"),
            temperature_range: [0, 50],
            table_name: "temps".into(),
            update_interval: 1000,
            graph_points: 60,
            debug_mode: true,
            extra: Map::new(),
        }
    }
}

impl Settings {
    pub const KNOWN_KEYS: [&'static str; 7] = [
        "db_path",
        "export_path",
        "temperature_range",
        "table_name",
        "update_interval",
        "graph_points",
        "debug_mode",
    ];

    pub fn validate(&self) -> Result<(), ValidationError> {
        Self::KNOWN_KEYS
            .iter()
            .try_for_each(|key| self.validate_key(key))
    }

    fn validate_key(&self, key: &str) -> Result<(), ValidationError> {
        let invalid = |reason: &str| {
            Err(ValidationError::InvalidSetting {
                key: key.into(),
                reason: reason.into(),
            })
        };

        match key {
            "table_name" => TableName::parse(&self.table_name).map(|_| ()),
            "update_interval" if self.update_interval == 0 => invalid("must be at least 1 ms"),
            "graph_points" if self.graph_points == 0 => invalid("must be at least 1"),
            "temperature_range" if self.temperature_range[0] >= self.temperature_range[1] => {
                invalid("minimum must be below maximum")
            }
            "db_path" if self.db_path.as_os_str().is_empty() => invalid("must not be empty"),
            _ => Ok(()),
        }
    }

    /// Replaces every invalid value with its built-in default.
    fn with_invalid_keys_reset(mut self) -> Self {
        let defaults = Settings::default();
        for key in Self::KNOWN_KEYS {
            let Err(err) = self.validate_key(key) else {
                continue;
            };
            warn!("{err}; using the default instead");
            match key {
                "db_path" => self.db_path = defaults.db_path.clone(),
                "export_path" => self.export_path = defaults.export_path.clone(),
                "temperature_range" => self.temperature_range = defaults.temperature_range,
                "table_name" => self.table_name = defaults.table_name.clone(),
                "update_interval" => self.update_interval = defaults.update_interval,
                "graph_points" => self.graph_points = defaults.graph_points,
                "debug_mode" => self.debug_mode = defaults.debug_mode,
                _ => {}
            }
        }
        self
    }

    fn to_map(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!("settings serialized to {other}, expected an object"),
        }
    }

    fn default_value(key: &str) -> Option<Value> {
        Settings::default().to_map().ok()?.remove(key)
    }
}

/// Where the settings document lives.
pub trait SettingsBackend: Send + Sync {
    /// Returns `None` when nothing has been persisted yet.
    fn read(&self) -> Result<Option<String>>;
    fn write(&self, contents: &str) -> Result<()>;
}

pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SettingsBackend for JsonFileBackend {
    fn read(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&self.path)
            .map(Some)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))
    }

    fn write(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

/// Keeps the document in memory; nothing touches the filesystem.
#[derive(Default)]
pub struct MemoryBackend {
    contents: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn with_contents(contents: &str) -> Self {
        Self {
            contents: Mutex::new(Some(contents.to_string())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SettingsBackend for MemoryBackend {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.contents())
    }

    fn write(&self, contents: &str) -> Result<()> {
        *self
            .contents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(contents.to_string());
        Ok(())
    }
}

pub struct SettingsStore {
    backend: Box<dyn SettingsBackend>,
    data: RwLock<Settings>,
}

impl SettingsStore {
    /// Loads persisted settings over the defaults. When nothing is persisted
    /// yet, the defaults are written out. Invalid values fall back to their
    /// defaults with a warning; the file itself is left alone until the next
    /// save.
    pub fn load(backend: Box<dyn SettingsBackend>) -> Result<Self> {
        let (data, persisted) = match backend.read()? {
            Some(contents) => (parse_settings(&contents)?, true),
            None => (Settings::default(), false),
        };

        let store = Self {
            backend,
            data: RwLock::new(data),
        };
        if !persisted {
            store.save()?;
        }
        Ok(store)
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        Self::load(Box::new(JsonFileBackend::new(path)))
    }

    pub fn settings(&self) -> Settings {
        self.read_guard().clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read_guard().to_map().ok()?.remove(key)
    }

    /// Sets one key and persists immediately.
    ///
    /// Returns `true` when the storage location (`db_path` or `table_name`)
    /// changed, in which case the store has to be verified again.
    pub fn set(&self, key: &str, value: Value) -> Result<bool> {
        let mut guard = self.write_guard();
        let mut map = guard.to_map()?;
        map.insert(key.to_string(), value);

        let updated: Settings = serde_json::from_value(Value::Object(map)).map_err(|err| {
            ValidationError::InvalidSetting {
                key: key.to_string(),
                reason: err.to_string(),
            }
        })?;
        updated.validate()?;

        let storage_changed =
            updated.db_path != guard.db_path || updated.table_name != guard.table_name;
        self.persist(&updated)?;
        *guard = updated;
        Ok(storage_changed)
    }

    /// Restores one key to its built-in default. Unknown keys are removed.
    pub fn reset_to_default(&self, key: &str) -> Result<bool> {
        match Settings::default_value(key) {
            Some(value) => self.set(key, value),
            None => {
                let mut guard = self.write_guard();
                let mut updated = guard.clone();
                updated.extra.remove(key);
                self.persist(&updated)?;
                *guard = updated;
                Ok(false)
            }
        }
    }

    /// Restores the built-in defaults exactly, dropping unknown keys.
    pub fn reset_all(&self) -> Result<bool> {
        let mut guard = self.write_guard();
        let defaults = Settings::default();
        let storage_changed =
            defaults.db_path != guard.db_path || defaults.table_name != guard.table_name;
        self.persist(&defaults)?;
        *guard = defaults;
        Ok(storage_changed)
    }

    pub fn save(&self) -> Result<()> {
        let guard = self.read_guard();
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let data = match self.backend.read()? {
            Some(contents) => parse_settings(&contents)?,
            None => Settings::default(),
        };
        *self.write_guard() = data;
        Ok(())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        self.backend.write(&serialized)
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, Settings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, Settings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_settings(contents: &str) -> Result<Settings> {
    let parsed: Settings =
        serde_json::from_str(contents).context("settings file is not a valid settings object")?;
    Ok(parsed.with_invalid_keys_reset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    struct SharedBackend(Arc<MemoryBackend>);

    impl SettingsBackend for SharedBackend {
        fn read(&self) -> Result<Option<String>> {
            self.0.read()
        }

        fn write(&self, contents: &str) -> Result<()> {
            self.0.write(contents)
        }
    }

    fn store_with(contents: Option<&str>) -> (Arc<MemoryBackend>, SettingsStore) {
        let backend = Arc::new(match contents {
            Some(text) => MemoryBackend::with_contents(text),
            None => MemoryBackend::default(),
        });
        let store = SettingsStore::load(Box::new(SharedBackend(backend.clone()))).unwrap();
        (backend, store)
    }

    #[test]
    fn missing_document_is_created_with_defaults() {
        let (backend, store) = store_with(None);
        assert_eq!(store.settings(), Settings::default());

        let written: Value = serde_json::from_str(&backend.contents().unwrap()).unwrap();
        assert_eq!(
            written,
            json!({
                "db_path": "sensor_database.db",
                "export_path": "exports",
                "temperature_range": [0, 50],
                "table_name": "temps",
                "update_interval": 1000,
                "graph_points": 60,
                "debug_mode": true
            })
        );
    }

    #[test]
    fn missing_keys_fall_back_and_unknown_keys_survive() {
        let (backend, store) = store_with(Some(
            r#"{"db_path": "lab.db", "graph_points": 120, "window_title": "Lab 3"}"#,
        ));

        let settings = store.settings();
        assert_eq!(settings.db_path, PathBuf::from("lab.db"));
        assert_eq!(settings.graph_points, 120);
        assert_eq!(settings.update_interval, 1000);
        assert_eq!(store.get("window_title"), Some(json!("Lab 3")));

        store.save().unwrap();
        let written: Value = serde_json::from_str(&backend.contents().unwrap()).unwrap();
        assert_eq!(written["window_title"], json!("Lab 3"));
        assert_eq!(written["table_name"], json!("temps"));
    }

    #[test]
    fn load_then_save_is_idempotent() {
        let original = r#"{"table_name": "lab", "temperature_range": [-10, 40], "note": {"a": 1}}"#;
        let (backend, store) = store_with(Some(original));
        assert_eq!(
            backend.contents().as_deref(),
            Some(original),
            "loading an existing document must not rewrite it"
        );

        store.save().unwrap();
        let once = backend.contents().unwrap();

        let (backend, store) = store_with(Some(&once));
        store.save().unwrap();
        assert_eq!(backend.contents().unwrap(), once);
    }

    #[test]
    fn set_persists_and_flags_storage_changes() {
        let (backend, store) = store_with(None);

        assert!(!store.set("update_interval", json!(250)).unwrap());
        assert!(store.set("db_path", json!("other.db")).unwrap());
        assert!(store.set("table_name", json!("cellar")).unwrap());

        let written: Value = serde_json::from_str(&backend.contents().unwrap()).unwrap();
        assert_eq!(written["update_interval"], json!(250));
        assert_eq!(written["db_path"], json!("other.db"));
        assert_eq!(store.get("table_name"), Some(json!("cellar")));
    }

    #[test]
    fn invalid_values_are_rejected_without_side_effects() {
        let (backend, store) = store_with(None);
        let before = backend.contents();

        for (key, value) in [
            ("update_interval", json!("fast")),
            ("update_interval", json!(0)),
            ("table_name", json!("temps; DROP TABLE temps")),
            ("temperature_range", json!([40, 10])),
        ] {
            let err = store.set(key, value).unwrap_err();
            assert!(err.downcast_ref::<ValidationError>().is_some(), "{key}: {err}");
        }

        assert_eq!(store.settings(), Settings::default());
        assert_eq!(backend.contents(), before);
    }

    #[test]
    fn reset_reproduces_builtin_defaults() {
        let (backend, store) = store_with(Some(
            r#"{"db_path": "x.db", "debug_mode": false, "graph_points": 5, "legacy": true}"#,
        ));

        assert!(!store.reset_to_default("graph_points").unwrap());
        assert_eq!(store.settings().graph_points, 60);
        assert!(store.reset_to_default("legacy").is_ok());
        assert_eq!(store.get("legacy"), None);

        assert!(store.reset_all().unwrap());
        assert_eq!(store.settings(), Settings::default());
        let written: Settings = serde_json::from_str(&backend.contents().unwrap()).unwrap();
        assert_eq!(written, Settings::default());
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let (backend, store) = store_with(None);
        backend
            .write(r#"{"debug_mode": false, "update_interval": 5000}"#)
            .unwrap();

        store.reload().unwrap();
        assert!(!store.settings().debug_mode);
        assert_eq!(store.settings().update_interval, 5000);
    }

    #[test]
    fn invalid_values_in_the_file_fall_back_to_defaults() {
        let (_, store) = store_with(Some(
            r#"{"update_interval": 0, "graph_points": 0, "table_name": "a b", "temperature_range": [30, 10], "db_path": "lab.db"}"#,
        ));

        let settings = store.settings();
        assert_eq!(settings.update_interval, 1000);
        assert_eq!(settings.graph_points, 60);
        assert_eq!(settings.table_name, "temps");
        assert_eq!(settings.temperature_range, [0, 50]);
        assert_eq!(settings.db_path, PathBuf::from("lab.db"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn reload_repairs_invalid_values() {
        let (backend, store) = store_with(None);
        backend.write(r#"{"update_interval": 0, "debug_mode": false}"#).unwrap();

        store.reload().unwrap();
        assert_eq!(store.settings().update_interval, 1000);
        assert!(!store.settings().debug_mode);
    }

    #[test]
    fn json_file_backend_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.json");

        let store = SettingsStore::open(path.clone()).unwrap();
        assert!(path.exists());
        store.set("graph_points", json!(30)).unwrap();

        let reopened = SettingsStore::open(path).unwrap();
        assert_eq!(reopened.settings().graph_points, 30);
    }
}

//! Engine settings and persisted view preferences.

use std::fs;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config_paths::{config_path, view_preferences_path};
use crate::error::{EngineError, Result};
use crate::session::LockoutPolicy;
use crate::view::ViewCriteria;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Collation locale for name sorting, e.g. "en" or "sv".
    pub locale: String,
    pub lockout_threshold: u32,
    pub lockout_minutes: i64,
    pub tick_interval_ms: u64,
    /// How often the session countdown is re-checked against the remote.
    pub reconcile_interval_secs: u64,
    /// Session length assumed when the remote cannot report one.
    pub default_session_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            locale: "en".to_string(),
            lockout_threshold: 5,
            lockout_minutes: 30,
            tick_interval_ms: 1_000,
            reconcile_interval_secs: 30,
            default_session_secs: 900,
        }
    }
}

impl EngineConfig {
    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            threshold: self.lockout_threshold.max(1),
            duration: Duration::minutes(self.lockout_minutes.max(0)),
        }
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Reads the config at the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Missing file yields the defaults; an unreadable or malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("Failed to read {}: {err}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|err| EngineError::Config(format!("Invalid config {}: {err}", path.display())))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

pub fn load_view_preferences() -> ViewCriteria {
    match view_preferences_path() {
        Ok(path) => load_view_preferences_from(&path),
        Err(_) => ViewCriteria::default(),
    }
}

/// Falls back to the default criteria when the file is missing or unreadable.
pub fn load_view_preferences_from(path: &Path) -> ViewCriteria {
    let Ok(raw) = fs::read_to_string(path) else {
        return ViewCriteria::default();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}

pub fn save_view_preferences(criteria: &ViewCriteria) -> Result<()> {
    save_view_preferences_to(&view_preferences_path()?, criteria)
}

pub fn save_view_preferences_to(path: &Path, criteria: &ViewCriteria) -> Result<()> {
    write_json(path, criteria)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let payload = serde_json::to_string_pretty(value)
        .map_err(|err| EngineError::Config(format!("Failed to serialize {}: {err}", path.display())))?;
    fs::write(path, payload)
        .map_err(|err| EngineError::Config(format!("Failed to write {}: {err}", path.display())))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| EngineError::Config(format!("Failed to create {}: {err}", parent.display())))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{SortDirection, SortField};

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.lockout_policy(), LockoutPolicy::default());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "locale": "sv", "lockoutThreshold": 3 }"#).unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.locale, "sv");
        assert_eq!(config.lockout_threshold, 3);
        assert_eq!(config.lockout_minutes, 30);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine").join("config.json");
        let config = EngineConfig {
            locale: "nb".to_string(),
            tick_interval_ms: 500,
            ..EngineConfig::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(EngineConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn view_preferences_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("view-preferences.json");
        let criteria = ViewCriteria {
            query: "report".to_string(),
            sort_field: SortField::Size,
            direction: SortDirection::Descending,
            favorites_only: true,
            ..ViewCriteria::default()
        };

        save_view_preferences_to(&path, &criteria).unwrap();
        assert_eq!(load_view_preferences_from(&path), criteria);

        fs::write(&path, "garbage").unwrap();
        assert_eq!(load_view_preferences_from(&path), ViewCriteria::default());
    }
}

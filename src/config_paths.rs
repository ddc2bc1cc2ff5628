//! Locations of the engine config and view preference files.

use std::path::PathBuf;

use crate::error::{EngineError, Result};

const CONFIG_DIR_ENV: &str = "VAULT_ENGINE_CONFIG_DIR";

pub fn engine_config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    let home = if cfg!(target_os = "windows") {
        std::env::var("USERPROFILE")
            .or_else(|_| std::env::var("HOME"))
            .map_err(|_| EngineError::Config("Unable to resolve USERPROFILE/HOME".to_string()))?
    } else {
        std::env::var("HOME").map_err(|_| EngineError::Config("Unable to resolve HOME".to_string()))?
    };

    let mut path = PathBuf::from(home);
    if cfg!(target_os = "macos") {
        path.push("Library");
        path.push("Application Support");
        path.push("vault-engine");
    } else {
        path.push(".config");
        path.push("vault-engine");
    }
    Ok(path)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(engine_config_dir()?.join("config.json"))
}

pub fn view_preferences_path() -> Result<PathBuf> {
    Ok(engine_config_dir()?.join("view-preferences.json"))
}

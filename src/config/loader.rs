//! Configuration File Loading
//!
//! Configuration documents are read from JSON, YAML or TOML files into a
//! `serde_json::Value` tree, which is then validated by [`super::validate_db_model`].
//!
//! # Lookup Order
//! 1. An explicit path (e.g. `--config`)
//! 2. The file named by the `DBFACADE_CONFIG` environment variable
//! 3. `.dbfacade/config.{json,yaml,yml,toml}` in the current directory
//! 4. `<user config dir>/dbfacade/config.{json,yaml,yml,toml}`

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FacadeError, Result};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "DBFACADE_CONFIG";

/// File names probed in the local and global config directories
pub const CONFIG_FILE_NAMES: [&str; 4] =
    ["config.json", "config.yaml", "config.yml", "config.toml"];

/// Where a configuration file was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Path given by the caller
    Explicit,
    /// Path taken from `DBFACADE_CONFIG`
    Environment,
    /// Local config: `.dbfacade/` in the current directory (per-project)
    Local,
    /// Global config: `~/.config/dbfacade/` (per-user)
    Global,
}

/// Get path to the local config directory (`.dbfacade/`)
pub fn local_config_dir() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        FacadeError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".dbfacade"))
}

/// Get path to the global config directory (`~/.config/dbfacade/`)
pub fn global_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| FacadeError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("dbfacade"))
}

/// First config file present in a directory
fn find_in_dir(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES.iter().map(|name| dir.join(name)).find(|path| path.is_file())
}

/// Read a configuration file, choosing the parser by extension
pub fn load_config_file(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path).map_err(|e| {
        FacadeError::config_error(format!("Could not read config file {}: {e}", path.display()))
    })?;

    let extension =
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).unwrap_or_default();

    match extension.as_str() {
        "json" => serde_json::from_str(&contents)
            .map_err(|e| FacadeError::config_error(format!("Invalid JSON config file: {e}"))),
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .map_err(|e| FacadeError::config_error(format!("Invalid YAML config file: {e}"))),
        "toml" => toml::from_str(&contents)
            .map_err(|e| FacadeError::config_error(format!("Invalid TOML config file: {e}"))),
        other => Err(FacadeError::config_error(format!(
            "Unsupported config file extension '{other}' (expected json, yaml, yml or toml)"
        ))),
    }
}

/// Find the configuration file to use
///
/// # Errors
/// Fails when an explicit or `DBFACADE_CONFIG` path does not exist, or when no
/// configuration file is found in the local and global directories.
pub fn locate_config(explicit: Option<&Path>) -> Result<(PathBuf, ConfigLocation)> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(FacadeError::config_error(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok((path.to_path_buf(), ConfigLocation::Explicit));
    }

    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from) {
        if !path.is_file() {
            return Err(FacadeError::config_error(format!(
                "Config file from {CONFIG_ENV_VAR} not found: {}",
                path.display()
            )));
        }
        return Ok((path, ConfigLocation::Environment));
    }

    let local_dir = local_config_dir()?;
    if let Some(path) = find_in_dir(&local_dir) {
        return Ok((path, ConfigLocation::Local));
    }

    let global_dir = global_config_dir()?;
    if let Some(path) = find_in_dir(&global_dir) {
        return Ok((path, ConfigLocation::Global));
    }

    Err(FacadeError::config_error(format!(
        "No configuration file found. Looked in {} and {}",
        local_dir.display(),
        global_dir.display()
    )))
}

/// Locate and read the configuration document
pub fn load_config(explicit: Option<&Path>) -> Result<(PathBuf, Value)> {
    let (path, location) = locate_config(explicit)?;
    tracing::debug!(path = %path.display(), ?location, "loading configuration");
    let value = load_config_file(&path)?;
    Ok((path, value))
}

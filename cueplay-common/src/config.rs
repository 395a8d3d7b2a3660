//! Configuration file resolution and TOML loading
//!
//! Config file location follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/<app>/config.toml`)
//! 4. None (caller falls back to built-in defaults)
//!
//! A missing config file never aborts startup: the loader logs a warning
//! and returns the defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable consulted when no CLI path is given
pub const CONFIG_ENV_VAR: &str = "CUEPLAY_CONFIG";

/// Logging configuration shared by all binaries
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve the config file path.
///
/// Returns `None` when no candidate exists; the caller uses defaults then.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    app_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: platform config directory
    let candidate = default_config_path(app_name)?;
    if candidate.exists() {
        Some(candidate)
    } else {
        None
    }
}

/// Platform default config file location (`~/.config/<app>/config.toml` on Linux)
pub fn default_config_path(app_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(app_name).join("config.toml"))
}

/// Parse a TOML config file into `T`.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("Config file not found: {}", path.display()))
        } else {
            Error::Io(e)
        }
    })?;
    let value = toml::from_str(&content)?;
    Ok(value)
}

/// Load `T` from `path`, falling back to `T::default()` when the file is absent.
///
/// Malformed files are still an error.
pub fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    match load_toml(path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Err(Error::NotFound(msg)) => {
            warn!("{}, using built-in defaults", msg);
            Ok(T::default())
        }
        Err(e) => Err(e),
    }
}

//! Configuration loading and config-file resolution
//!
//! Bootstrap configuration is a single TOML file. Its location is resolved in
//! priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/<app>/config.toml`)
//!
//! A missing file is not an error: callers receive `T::default()` and a warning
//! is logged, so the application always starts with built-in defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error or a full EnvFilter directive)
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

/// Resolves the bootstrap config file path for one application
pub struct ConfigFileResolver {
    app_name: String,
    env_var_name: String,
}

impl ConfigFileResolver {
    /// Create a resolver for `app_name`, reading overrides from `env_var_name`
    pub fn new(app_name: impl Into<String>, env_var_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            env_var_name: env_var_name.into(),
        }
    }

    /// Resolve the config path
    ///
    /// Returns `None` when neither an explicit path nor a default file exists.
    /// An explicit CLI or environment path is returned even if the file is
    /// missing, so the loader can report it.
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = cli_arg {
            return Some(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(&self.env_var_name) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        let default_path = self.default_path()?;
        default_path.exists().then_some(default_path)
    }

    /// Platform default location (`<config_dir>/<app>/config.toml`)
    pub fn default_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(&self.app_name).join("config.toml"))
    }
}

/// Load a TOML config file, falling back to defaults when it is absent
///
/// Parse errors are reported; a missing file only warns.
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using built-in defaults");
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))?;
    info!(path = %path.display(), "Config loaded");
    Ok(config)
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolve a secret: environment variable first, then the configured value
///
/// Blank values are treated as unset.
pub fn resolve_secret(env_var_name: &str, configured: Option<&str>) -> Option<String> {
    if let Ok(value) = std::env::var(env_var_name) {
        if is_valid_key(&value) {
            return Some(value);
        }
    }
    configured.filter(|v| is_valid_key(v)).map(str::to_string)
}

/// Validate key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

//! Configuration types for seekr.

use crate::error::{Result, SeekrError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default seekrd interval: 30 minutes.
pub const DEFAULT_SEEKRD_INTERVAL_SECS: u64 = 30 * 60;

/// Default API port.
pub const DEFAULT_PORT: u16 = 8569;

/// Top-level seekr configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeekrConfig {
    /// API server settings.
    pub server: ServerConfig,
    /// General toggles and file locations.
    pub general: GeneralConfig,
    /// Background service daemon settings.
    pub seekrd: SeekrdConfig,
}

/// API server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (usually `127.0.0.1` or `0.0.0.0`).
    pub ip: String,
    /// Port to serve the API on.
    pub port: u16,
    /// Fail startup when `port` is taken instead of falling back to a free port.
    pub force_port: bool,
    /// Send `Access-Control-Allow-Origin: *` on every response.
    pub set_cors_header: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_owned(),
            port: DEFAULT_PORT,
            force_port: false,
            set_cors_header: true,
        }
    }
}

/// File locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// JSON database file.
    pub data_file: PathBuf,
    /// Log file written alongside stderr output.
    pub log_file: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data.json"),
            log_file: PathBuf::from("seekr.log"),
        }
    }
}

/// Background service daemon (seekrd) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeekrdConfig {
    /// Whether the scheduler is started at all.
    pub enabled: bool,
    /// Seconds between scheduler ticks. Must be non-zero.
    pub interval_secs: u64,
}

impl Default for SeekrdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_SEEKRD_INTERVAL_SECS,
        }
    }
}

impl SeekrdConfig {
    /// Tick interval as a [`std::time::Duration`].
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }
}

impl SeekrConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns [`SeekrError::NoConfigFile`] when the file does not exist, and
    /// [`SeekrError::Config`] when it cannot be parsed or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SeekrError::NoConfigFile(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self =
            toml::from_str(&content).map_err(|e| SeekrError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SeekrError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the rest of the process cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.seekrd.interval_secs == 0 {
            return Err(SeekrError::Config(
                "seekrd.interval_secs must be greater than zero".to_owned(),
            ));
        }
        if self.server.ip.trim().is_empty() {
            return Err(SeekrError::Config("server.ip must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/seekr/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("seekr").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("seekr.toml"))
    }
}

//! Configuration management for nearcast.
//!
//! The config file lives at a platform-appropriate location:
//! - Linux: `~/.config/nearcast/config.toml`
//! - macOS: `~/Library/Application Support/nearcast/config.toml`
//!
//! On first run, no config file exists. The daemon detects this and
//! creates one with a fresh `device_id` and the user's chosen display name.
//!
//! # Config File Format (TOML)
//!
//! ```toml
//! device_id = "550e8400-e29b-41d4-a716-446655440000"
//! display_name = "PC-Sala"
//! tcp_port = 60000
//! discovery_port = 50000
//! ```

use crate::types::DeviceId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// TCP service default port (configurable).
pub const DEFAULT_TCP_PORT: u16 = 60000;
/// UDP discovery port (fixed in practice, but exposed as a config knob).
pub const DEFAULT_DISCOVERY_PORT: u16 = 50000;

/// Errors that can occur when loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[error("failed to parse config file at {path}: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },

    #[error("failed to write config file at {path}: {source}")]
    WriteFile { path: PathBuf, source: std::io::Error },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("could not determine config directory for this platform")]
    NoConfigDir,
}

/// The persisted configuration for this nearcast instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Unique identifier for this device (UUID v4, generated once).
    pub device_id: String,

    /// Human-readable name for this device (chosen by user, defaults to
    /// the hostname).
    pub display_name: String,

    /// TCP port the connection manager's acceptor binds to.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// UDP port the discovery service binds to.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// Directory holding the device-id file, chat logs, group state, and
    /// received files. Defaults to the platform data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

impl AppConfig {
    /// Returns the platform-appropriate config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("nearcast"))
    }

    /// Returns the full path to the config file.
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir().ok_or(ConfigError::NoConfigDir)?.join("config.toml"))
    }

    /// Returns the platform-appropriate data directory (device id, chat
    /// logs, group state, received files).
    pub fn default_data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("nearcast"))
    }

    /// Returns the effective data directory: the configured one, or the
    /// platform default.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_data_dir().ok_or(ConfigError::NoConfigDir),
        }
    }

    /// Loads the config from the default config file path.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    /// Loads the config from a specific file path. Returns `Ok(None)` if
    /// the file doesn't exist yet (first run).
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_owned(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseFile {
            path: path.to_owned(),
            source: e,
        })?;
        Ok(Some(config))
    }

    /// Saves this config to the default config file path.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_file_path()?;
        self.save_to(&path)
    }

    /// Saves this config to a specific file path, creating parent
    /// directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
                path: path.to_owned(),
                source: e,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::WriteFile {
            path: path.to_owned(),
            source: e,
        })?;
        Ok(())
    }

    /// Creates a new config for first-run with a fresh device id.
    pub fn new_first_run(display_name: &str) -> Self {
        Self {
            device_id: DeviceId::generate().to_string(),
            display_name: display_name.to_string(),
            tcp_port: DEFAULT_TCP_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            data_dir: None,
        }
    }
}

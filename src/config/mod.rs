//! Configuration module for sensorgraph-rs
//!
//! This module handles the tunables of a device session:
//! - Per-operation response deadlines for the command correlator
//! - Idle timeout for log downloads
//! - Log reassembly windows (see [`LogConfig`])
//!
//! Configuration files may be written as JSON or TOML; the format is chosen
//! from the file extension.
//!
//! # Example
//!
//! ```ignore
//! use sensorgraph_rs::config::DeviceConfig;
//!
//! let mut config = DeviceConfig::load_or_default("board.toml");
//! config.response_timeout_ms = 500;
//! config.save("board.toml")?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Result, SensorError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.sensorgraph-rs";

/// Default config filename inside the config directory
pub const CONFIG_FILE: &str = "device.toml";

/// Default deadline for a command awaiting a response
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// Default maximum silence between log readout progress updates
pub const DEFAULT_DOWNLOAD_IDLE_TIMEOUT_MS: u64 = 5000;

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Session configuration for a connected board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Deadline for every command expecting a response (milliseconds)
    pub response_timeout_ms: u64,

    /// Maximum gap between log readout progress notifications (milliseconds)
    pub download_idle_timeout_ms: u64,

    /// Read module info for every known module at connect time
    pub discover_modules: bool,

    /// Log reassembly policy
    pub log: LogConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            download_idle_timeout_ms: DEFAULT_DOWNLOAD_IDLE_TIMEOUT_MS,
            discover_modules: true,
            log: LogConfig::default(),
        }
    }
}

impl DeviceConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn download_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.download_idle_timeout_ms)
    }

    /// Check the values for internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(SensorError::Config(
                "response_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.download_idle_timeout_ms == 0 {
            return Err(SensorError::Config(
                "download_idle_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.log.validate()
    }

    /// Load configuration from a JSON or TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SensorError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: DeviceConfig = if is_toml(path) {
            toml::from_str(&content).map_err(|e| {
                SensorError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                SensorError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Falling back to default device config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration, choosing the format from the extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SensorError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| SensorError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| SensorError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            SensorError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}

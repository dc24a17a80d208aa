//! GattMsg CLI Configuration Management
//!
//! Configuration is layered with figment, lowest priority first:
//! - Built-in defaults
//! - `gattmsg.toml` in the working directory
//! - The file given with `--config`
//! - Environment variables (`GATTMSG_*`, nested keys split on `__`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use gattmsg_ble::BleConfig;
use gattmsg_core::{CentralConfig, PeripheralConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "gattmsg.toml";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub central: CentralConfig,
    pub peripheral: PeripheralConfig,
    pub radio: RadioConfig,
    pub cli: CliConfig,
}

/// Radio adapter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub connection_timeout_secs: u64,
    /// Host adapter used for the central role
    pub adapter_index: usize,
    pub write_response_timeout_secs: u64,
}

/// Command defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Duration of `scan` without `--seconds`
    pub scan_seconds: u64,
    /// How long `chat` looks for its peer without `--seconds`
    pub discovery_seconds: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 10,
            adapter_index: 0,
            write_response_timeout_secs: 5,
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            scan_seconds: 10,
            discovery_seconds: 30,
        }
    }
}

impl RadioConfig {
    pub fn to_ble_config(&self) -> BleConfig {
        BleConfig::new()
            .with_connection_timeout(Duration::from_secs(self.connection_timeout_secs))
            .with_adapter_index(self.adapter_index)
            .with_write_response_timeout(Duration::from_secs(self.write_response_timeout_secs))
    }
}

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Loading(#[from] figment::Error),

    #[error("Configuration file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// All configuration layers, ready for extraction
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("GATTMSG_").split("__"))
    }

    /// Load and validate. An explicit config path must exist.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
        }

        let config: AppConfig = Self::figment(config_path).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.central.max_payload_len == 0 {
            return Err(ConfigError::Validation(
                "central.max_payload_len must be greater than 0".to_string(),
            ));
        }
        if self.peripheral.local_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "peripheral.local_name must not be empty".to_string(),
            ));
        }
        if self.radio.connection_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "radio.connection_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

//! Configuration
//!
//! Queues take their timeout as a plain value at construction; this module
//! only loads and validates it. There is no process-wide configuration
//! singleton.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// USB communication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbConfig {
    /// Per-transfer timeout in milliseconds, enforced by the platform.
    #[serde(default = "UsbConfig::default_timeout_ms")]
    pub timeout_ms: u32,
    /// Device scan interval in milliseconds, for the enumeration layer
    /// hosting the queues.
    #[serde(default = "UsbConfig::default_scan_interval_ms")]
    pub scan_interval_ms: u32,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            scan_interval_ms: Self::default_scan_interval_ms(),
        }
    }
}

impl UsbConfig {
    fn default_timeout_ms() -> u32 {
        5000
    }

    fn default_scan_interval_ms() -> u32 {
        500
    }

    /// Load configuration from the specified path, or from the default
    /// location if none is given.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => {
                let p = Self::default_path();
                if !p.exists() {
                    return Err(anyhow!("No configuration file found at {}", p.display()));
                }
                p
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: UsbConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or fall back to defaults if not found or invalid.
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// The default configuration file path.
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbq").join("config.toml")
        } else {
            PathBuf::from(".config/usbq/config.toml")
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(anyhow!("timeout_ms must be greater than 0"));
        }
        if self.scan_interval_ms == 0 {
            return Err(anyhow!("scan_interval_ms must be greater than 0"));
        }
        Ok(())
    }
}

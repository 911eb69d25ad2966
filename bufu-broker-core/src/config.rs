//! Broker configuration

use crate::error::BrokerError;
use crate::monitor::{FileMode, ObserverSettings, WatchMask};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete broker configuration, loadable from TOML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Directory holding the `run<N>` directories
    pub base_directory: PathBuf,
    /// Prepended to index file names when they are handed out
    pub index_file_prefix: String,
    pub file_mode: FileMode,
    /// Longest wait of the watcher before it checks for a stop request
    pub poll_interval_ms: u64,
    pub server: ServerConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::from("/fff/ramdisk"),
            index_file_prefix: "fu/".to_string(),
            file_mode: FileMode::Jsn,
            poll_interval_ms: 250,
            server: ServerConfig::default(),
        }
    }
}

/// HTTP request server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Worker threads of the request runtime
    pub threads: usize,
    /// Log every request and response
    pub debug_http_requests: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0".to_string(), port: 8080, threads: 1, debug_http_requests: false }
    }
}

impl BrokerConfig {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Reject values the broker cannot run with
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.server.threads == 0 {
            return Err(BrokerError::config("server.threads must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(BrokerError::config("poll_interval_ms must be at least 1"));
        }
        if self.index_file_prefix.starts_with('/') {
            return Err(BrokerError::config(format!(
                "index_file_prefix must be relative to the run directory, got '{}'",
                self.index_file_prefix
            )));
        }
        Ok(())
    }

    /// Settings handed to each run observer
    pub fn observer_settings(&self) -> ObserverSettings {
        ObserverSettings {
            file_mode: self.file_mode,
            mask: WatchMask::default(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

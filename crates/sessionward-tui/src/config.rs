//! Application configuration management.
//!
//! Holds the service URL, the last used username and optional session timing
//! overrides. Stored at `~/.config/sessionward/config.json`; environment
//! variables (`SESSIONWARD_API_URL`) take precedence over the file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use sessionward_core::{SessionConfig, TransportConfig};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessionward";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const API_URL_ENV: &str = "SESSIONWARD_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub last_username: Option<String>,
    /// Keep the password in the OS keychain after a successful login
    pub remember_password: bool,
    pub session: Option<SessionConfig>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the log file
    pub fn log_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn transport_config(&self) -> TransportConfig {
        let base_url = std::env::var(API_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.api_base_url.clone());

        match base_url {
            Some(base_url) => TransportConfig {
                base_url,
                ..Default::default()
            },
            None => TransportConfig::default(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }
}

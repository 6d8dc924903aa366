//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! backend URL, renewal interval, request timeout, where the session is
//! stored, and the last email used to log in.
//!
//! Configuration is stored at `~/.config/stockroom/config.json`.
//! `STOCKROOM_API_URL` and `STOCKROOM_STORE` override the file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::{AuthClient, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::auth::{FileStore, KeyringStore, MemoryStore, SessionOptions, SessionStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "stockroom";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

const DEFAULT_RENEWAL_INTERVAL_SECS: u64 = 60;

pub const ENV_API_URL: &str = "STOCKROOM_API_URL";
pub const ENV_STORE: &str = "STOCKROOM_STORE";

/// Where the session tokens are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Keyring,
    /// Not persisted; the session ends with the process
    Memory,
}

impl StoreKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => Some(StoreKind::File),
            "keyring" => Some(StoreKind::Keyring),
            "memory" => Some(StoreKind::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub renewal_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub store: StoreKind,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            renewal_interval_secs: DEFAULT_RENEWAL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            store: StoreKind::default(),
            last_email: None,
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
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

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(value) = lookup(ENV_STORE) {
            match StoreKind::parse(&value) {
                Some(kind) => self.store = kind,
                None => warn!(value = %value, "Ignoring unknown {}", ENV_STORE),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            renewal_interval: Duration::from_secs(self.renewal_interval_secs),
        }
    }

    pub fn auth_client(&self) -> Result<AuthClient> {
        AuthClient::new(&self.api_base_url, self.request_timeout())
            .with_context(|| format!("Failed to create API client for {}", self.api_base_url))
    }

    /// Open the configured session store.
    pub fn session_store(&self) -> Result<Arc<dyn SessionStore>> {
        Ok(match self.store {
            StoreKind::File => Arc::new(FileStore::new(self.cache_dir()?)),
            StoreKind::Keyring => Arc::new(KeyringStore::new()),
            StoreKind::Memory => Arc::new(MemoryStore::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.session_options().renewal_interval, Duration::from_secs(60));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.store, StoreKind::File);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"store": "keyring", "last_email": "a@b.com"}"#).unwrap();
        assert_eq!(config.store, StoreKind::Keyring);
        assert_eq!(config.last_email.as_deref(), Some("a@b.com"));
        assert_eq!(config.renewal_interval_secs, 60);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_API_URL, " https://inventory.example.com/api "),
            (ENV_STORE, "Memory"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.api_base_url, "https://inventory.example.com/api");
        assert_eq!(config.store, StoreKind::Memory);
    }

    #[test]
    fn test_unknown_store_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == ENV_STORE).then(|| "cloud".to_string()));
        assert_eq!(config.store, StoreKind::File);
    }

    #[test]
    fn test_store_kind_parse() {
        assert_eq!(StoreKind::parse("file"), Some(StoreKind::File));
        assert_eq!(StoreKind::parse(" KEYRING "), Some(StoreKind::Keyring));
        assert_eq!(StoreKind::parse("s3"), None);
    }
}

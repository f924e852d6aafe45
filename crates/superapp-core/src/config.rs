//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which selects the session store backend, bounds store calls, and
//! remembers the last email used to sign in.
//!
//! Configuration is stored at `~/.config/superapp/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::DEFAULT_STORE_TIMEOUT;
use crate::store::keychain::SERVICE_NAME;
use crate::store::{FileStore, KeyValueStore, KeyringStore, MemoryStore};

/// Application name used for config/data directory paths
const APP_NAME: &str = "superapp";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Where the session is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JSON files in the data directory
    #[default]
    File,
    /// OS keychain
    Keyring,
    /// Nothing persisted; every run starts signed out
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub store: StoreBackend,
    pub store_timeout_secs: u64,
    pub log_to_file: bool,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            store: StoreBackend::default(),
            store_timeout_secs: DEFAULT_STORE_TIMEOUT.as_secs(),
            log_to_file: false,
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
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

    /// Directory for the file store and log files.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("logs"))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs.max(1))
    }

    /// Build the configured session store.
    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        let store: Arc<dyn KeyValueStore> = match self.store {
            StoreBackend::File => {
                let dir = self.data_dir()?;
                Arc::new(FileStore::new(dir.clone()).with_context(|| {
                    format!("Failed to open data directory {}", dir.display())
                })?)
            }
            StoreBackend::Keyring => Arc::new(
                KeyringStore::open(SERVICE_NAME).context("The OS keychain cannot hold the session")?,
            ),
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}

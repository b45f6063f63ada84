//! Configuration file for the resync CLI.
//!
//! ```toml
//! [sync]
//! batch_size = 10
//!
//! [storage]
//! database = "local.db"
//! remote = "/srv/resync/remote.db"
//! ```
//!
//! Relative storage paths resolve against the data directory.

use anyhow::{Context, Result};
use resync_client::SyncConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the config file looked up in the data directory.
pub const CONFIG_FILE: &str = "resync.toml";

/// Where the two databases live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Local store, queue and histories.
    #[serde(default = "default_database")]
    pub database: PathBuf,
    /// Loopback remote.
    #[serde(default = "default_remote")]
    pub remote: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from("local.db")
}

fn default_remote() -> PathBuf {
    PathBuf::from("remote.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            remote: default_remote(),
        }
    }
}

/// Full CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CliConfig {
    /// Queue and conflict engine settings.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Database locations.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl CliConfig {
    /// Load the configuration.
    ///
    /// An explicit path must exist. Otherwise `resync.toml` in the data
    /// directory is used when present, and defaults when not.
    pub async fn load(data_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = data_dir.join(CONFIG_FILE);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };

        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse TOML and validate the sync section.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.sync.validate()?;
        Ok(config)
    }

    /// Absolute location of the local database.
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.storage.database)
    }

    /// Absolute location of the remote database.
    pub fn remote_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.storage.remote)
    }
}

//! Configuration for the sync queue and the conflict engine.
//!
//! Configuration is passed explicitly to [`SyncQueue`](crate::SyncQueue) and
//! [`ConflictEngine`](crate::ConflictEngine). It can be built in code or
//! loaded from TOML:
//!
//! ```toml
//! auto_resolve_conflicts = true
//! auto_resolve_high_priority = false
//! batch_size = 20
//! retry_attempts = 3
//! sync_interval_ms = 60000
//!
//! [auto_resolve_by_type]
//! contacts = false
//! ```

use resync_core::AutoResolvePolicy;
use resync_types::DataType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::HistoryLimits;

/// Sync and conflict-resolution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Resolve conflicts without a person when policy allows (default: true).
    #[serde(default = "default_auto_resolve")]
    pub auto_resolve_conflicts: bool,
    /// Also auto-resolve high-priority conflicts (default: false).
    #[serde(default)]
    pub auto_resolve_high_priority: bool,
    /// Per data type auto-resolve switches; absent types follow the global
    /// switch.
    #[serde(default)]
    pub auto_resolve_by_type: BTreeMap<DataType, bool>,
    /// Maximum items selected per batch round (default: 20).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upload attempts before an item fails terminally (default: 3).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Periodic sync interval in milliseconds (default: 60000).
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Backups kept (default: 100).
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    /// Audit entries kept (default: 1000).
    #[serde(default = "default_max_audit_entries")]
    pub max_audit_entries: usize,
    /// Resolved conflicts kept (default: 200).
    #[serde(default = "default_max_conflicts")]
    pub max_conflicts: usize,
}

// Default value functions
fn default_auto_resolve() -> bool {
    true
}

fn default_batch_size() -> usize {
    20
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_sync_interval_ms() -> u64 {
    60_000
}

fn default_max_backups() -> usize {
    100
}

fn default_max_audit_entries() -> usize {
    1000
}

fn default_max_conflicts() -> usize {
    200
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_resolve_conflicts: default_auto_resolve(),
            auto_resolve_high_priority: false,
            auto_resolve_by_type: BTreeMap::new(),
            batch_size: default_batch_size(),
            retry_attempts: default_retry_attempts(),
            sync_interval_ms: default_sync_interval_ms(),
            max_backups: default_max_backups(),
            max_audit_entries: default_max_audit_entries(),
            max_conflicts: default_max_conflicts(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the queue cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry_attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "sync_interval_ms",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Periodic sync interval.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Auto-resolve policy for the strategy engine.
    pub fn policy(&self) -> AutoResolvePolicy {
        AutoResolvePolicy {
            auto_resolve: self.auto_resolve_conflicts,
            auto_resolve_high_priority: self.auto_resolve_high_priority,
            by_type: self.auto_resolve_by_type.clone(),
        }
    }

    /// History bounds for storage implementations.
    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            max_conflicts: self.max_conflicts,
            max_backups: self.max_backups,
            max_audit_entries: self.max_audit_entries,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// The offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

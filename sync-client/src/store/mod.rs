//! Storage collaborator traits.
//!
//! The client never owns a database. It talks to three narrow traits:
//! - [`LocalStore`] - the application's records, per data type
//! - [`QueueStore`] - durable queue items and sync checkpoints
//! - [`HistoryStore`] - bounded conflict, backup and audit histories
//!
//! [`MemoryStore`] implements all three in memory. `resync-store` provides a
//! SQLite implementation.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resync_types::{AuditEntry, Backup, Conflict, ConflictId, DataType, ItemId, Record, SyncItem};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A value could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The backend is temporarily unable to serve the request.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The backend failed.
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The application's local record store.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Read one record.
    async fn get(&self, data_type: DataType, id: &str) -> Result<Option<Record>, StorageError>;

    /// Read every record of a data type.
    async fn get_all(&self, data_type: DataType) -> Result<Vec<Record>, StorageError>;

    /// Insert or replace a record, keyed by its id.
    async fn put(&self, data_type: DataType, record: &Record) -> Result<(), StorageError>;

    /// Delete a record. Deleting a missing record is not an error.
    async fn delete(&self, data_type: DataType, id: &str) -> Result<(), StorageError>;
}

/// Durable queue state.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert or replace a queue item.
    async fn save_item(&self, item: &SyncItem) -> Result<(), StorageError>;

    /// Delete queue items.
    async fn remove_items(&self, ids: &[ItemId]) -> Result<(), StorageError>;

    /// Every stored queue item, in no particular order.
    async fn load_items(&self) -> Result<Vec<SyncItem>, StorageError>;

    /// Persist a data type's sync checkpoint.
    async fn save_checkpoint(
        &self,
        data_type: DataType,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Every stored checkpoint.
    async fn load_checkpoints(&self) -> Result<Vec<(DataType, DateTime<Utc>)>, StorageError>;
}

/// Bounded histories of conflicts, backups and audit entries.
///
/// Implementations evict the oldest resolved conflicts, backups and audit
/// entries beyond their bounds. Unresolved conflicts are never evicted.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Insert or replace a conflict snapshot.
    async fn save_conflict(&self, conflict: &Conflict) -> Result<(), StorageError>;

    /// One conflict, open or resolved.
    async fn load_conflict(&self, id: &ConflictId) -> Result<Option<Conflict>, StorageError>;

    /// Every retained conflict.
    async fn load_conflicts(&self) -> Result<Vec<Conflict>, StorageError>;

    /// Store a pre-resolution snapshot.
    async fn save_backup(&self, backup: &Backup) -> Result<(), StorageError>;

    /// Snapshots taken for one conflict.
    async fn load_backups(&self, conflict_id: &ConflictId) -> Result<Vec<Backup>, StorageError>;

    /// Append an audit entry.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError>;

    /// Up to `limit` audit entries, newest first.
    async fn load_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError>;
}

/// Everything the queue and the conflict engine need from storage.
pub trait Storage: LocalStore + QueueStore + HistoryStore {}

impl<T: LocalStore + QueueStore + HistoryStore> Storage for T {}

/// Bounds on the retained histories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    /// Resolved conflicts kept.
    pub max_conflicts: usize,
    /// Backups kept.
    pub max_backups: usize,
    /// Audit entries kept.
    pub max_audit_entries: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_conflicts: 200,
            max_backups: 100,
            max_audit_entries: 1000,
        }
    }
}

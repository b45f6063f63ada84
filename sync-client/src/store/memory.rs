//! In-memory storage for tests and ephemeral use.

use super::{HistoryLimits, HistoryStore, LocalStore, QueueStore, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resync_core::{Checkpoints, History};
use resync_types::{
    AuditEntry, Backup, Conflict, ConflictId, DataType, ItemId, ItemStatus, Record, SyncItem,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory implementation of every storage trait.
///
/// Clones share state, so a test can keep a handle while the queue owns
/// another.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug)]
struct MemoryStoreInner {
    records: BTreeMap<(DataType, String), Record>,
    items: BTreeMap<ItemId, SyncItem>,
    checkpoints: Checkpoints,
    history: History,
    fail_next_put: Option<String>,
    fail_next_queue_write: Option<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with default history bounds.
    pub fn new() -> Self {
        Self::with_limits(HistoryLimits::default())
    }

    /// Create an empty store with the given history bounds.
    pub fn with_limits(limits: HistoryLimits) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                records: BTreeMap::new(),
                items: BTreeMap::new(),
                checkpoints: Checkpoints::new(),
                history: History::new(
                    limits.max_conflicts,
                    limits.max_backups,
                    limits.max_audit_entries,
                ),
                fail_next_put: None,
                fail_next_queue_write: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cause the next `put()` to fail with the given message.
    pub fn fail_next_put(&self, error: &str) {
        self.lock().fail_next_put = Some(error.to_string());
    }

    /// Cause the next `save_item()` or `remove_items()` to fail with the
    /// given message.
    pub fn fail_next_queue_write(&self, error: &str) {
        self.lock().fail_next_queue_write = Some(error.to_string());
    }

    /// Stored copy of a queue item.
    pub fn stored_item(&self, id: &ItemId) -> Option<SyncItem> {
        self.lock().items.get(id).cloned()
    }

    /// Number of stored queue items.
    pub fn item_count(&self) -> usize {
        self.lock().items.len()
    }

    /// Number of retained backups.
    pub fn backup_count(&self) -> usize {
        self.lock().history.backups.len()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, data_type: DataType, id: &str) -> Result<Option<Record>, StorageError> {
        Ok(self.lock().records.get(&(data_type, id.to_string())).cloned())
    }

    async fn get_all(&self, data_type: DataType) -> Result<Vec<Record>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .records
            .iter()
            .filter(|((dt, _), _)| *dt == data_type)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn put(&self, data_type: DataType, record: &Record) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_put.take() {
            return Err(StorageError::Unavailable(error));
        }
        let id = record
            .id()
            .ok_or_else(|| StorageError::Encoding("record has no id".into()))?;
        inner.records.insert((data_type, id), record.clone());
        Ok(())
    }

    async fn delete(&self, data_type: DataType, id: &str) -> Result<(), StorageError> {
        self.lock().records.remove(&(data_type, id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn save_item(&self, item: &SyncItem) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_queue_write.take() {
            return Err(StorageError::Unavailable(error));
        }
        let mut stored = item.clone();
        if stored.status == ItemStatus::Syncing {
            stored.status = ItemStatus::Pending;
        }
        inner.items.insert(stored.id, stored);
        Ok(())
    }

    async fn remove_items(&self, ids: &[ItemId]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_queue_write.take() {
            return Err(StorageError::Unavailable(error));
        }
        for id in ids {
            inner.items.remove(id);
        }
        Ok(())
    }

    async fn load_items(&self) -> Result<Vec<SyncItem>, StorageError> {
        Ok(self.lock().items.values().cloned().collect())
    }

    async fn save_checkpoint(
        &self,
        data_type: DataType,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.lock().checkpoints.advance(data_type, at);
        Ok(())
    }

    async fn load_checkpoints(&self) -> Result<Vec<(DataType, DateTime<Utc>)>, StorageError> {
        Ok(self.lock().checkpoints.iter().collect())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn save_conflict(&self, conflict: &Conflict) -> Result<(), StorageError> {
        self.lock().history.record_conflict(conflict.clone());
        Ok(())
    }

    async fn load_conflict(&self, id: &ConflictId) -> Result<Option<Conflict>, StorageError> {
        Ok(self.lock().history.conflict(id).cloned())
    }

    async fn load_conflicts(&self) -> Result<Vec<Conflict>, StorageError> {
        Ok(self.lock().history.conflicts().cloned().collect())
    }

    async fn save_backup(&self, backup: &Backup) -> Result<(), StorageError> {
        self.lock().history.backups.push(backup.clone());
        Ok(())
    }

    async fn load_backups(&self, conflict_id: &ConflictId) -> Result<Vec<Backup>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .history
            .backups
            .iter()
            .filter(|b| b.conflict_id == *conflict_id)
            .cloned()
            .collect())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        self.lock().history.audit.push(entry.clone());
        Ok(())
    }

    async fn load_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .history
            .audit
            .latest(limit)
            .into_iter()
            .cloned()
            .collect())
    }
}

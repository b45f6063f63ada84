//! SQLite backend for the local store, the durable queue and the histories.

use crate::error::{SqliteError, SqliteResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use resync_client::{
    HistoryLimits, HistoryStore, LocalStore, QueueStore, StorageError,
};
use resync_types::{
    AuditEntry, Backup, Conflict, ConflictId, ConflictStatus, DataType, ItemId, ItemStatus,
    Record, SyncItem,
};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Open a pool on a database file, creating it if missing.
///
/// Uses WAL mode for concurrent reads/writes.
pub(crate) async fn open_pool(path: &Path) -> SqliteResult<SqlitePool> {
    let path_str = path.to_str().ok_or_else(|| SqliteError::InvalidPath {
        path: path.to_path_buf(),
    })?;
    let options = SqliteConnectOptions::from_str(path_str)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Open a single-connection in-memory pool (for testing).
pub(crate) async fn memory_pool() -> SqliteResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(":memory:")?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    // Every connection is its own database: keep exactly one alive.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Fixed-width RFC 3339, so stored instants compare correctly as text.
pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_time(text: &str) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| SqliteError::Encoding(format!("bad timestamp {:?}: {}", text, e)))
}

fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, StorageError> {
    serde_json::from_str(body).map_err(|e| SqliteError::from(e).into())
}

fn decode_data_type(name: &str) -> SqliteResult<DataType> {
    DataType::from_store_name(name).map_err(|e| SqliteError::Encoding(e.to_string()))
}

/// SQLite implementation of every storage trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    limits: HistoryLimits,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub async fn new(path: &Path) -> SqliteResult<Self> {
        let store = Self {
            pool: open_pool(path).await?,
            limits: HistoryLimits::default(),
        };
        store.run_migrations().await?;
        tracing::debug!("Opened store at {}", path.display());
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> SqliteResult<Self> {
        let store = Self {
            pool: memory_pool().await?,
            limits: HistoryLimits::default(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Use different history bounds.
    pub fn with_limits(mut self, limits: HistoryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> SqliteResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                data_type TEXT NOT NULL,
                record_id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (data_type, record_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                item_id BLOB PRIMARY KEY,
                item BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                data_type TEXT PRIMARY KEY,
                synced_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conflicts (
                conflict_id BLOB PRIMARY KEY,
                status TEXT NOT NULL,
                detected_at TEXT NOT NULL,
                resolved_at TEXT,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backups (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                backup_id BLOB NOT NULL UNIQUE,
                conflict_id BLOB NOT NULL,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                audit_id BLOB NOT NULL UNIQUE,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflicts(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_backups_conflict ON backups(conflict_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Drop the oldest resolved conflicts beyond the bound. Open conflicts
    /// are never touched.
    async fn trim_conflicts(&self) -> SqliteResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM conflicts
            WHERE status = ?1 AND conflict_id NOT IN (
                SELECT conflict_id FROM conflicts
                WHERE status = ?1
                ORDER BY resolved_at DESC, rowid DESC
                LIMIT ?2
            )
            "#,
        )
        .bind(ConflictStatus::Resolved.to_string())
        .bind(self.limits.max_conflicts as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn trim_log(&self, table: &'static str, keep: usize) -> SqliteResult<u64> {
        let sql = format!(
            "DELETE FROM {table} WHERE seq NOT IN (SELECT seq FROM {table} ORDER BY seq DESC LIMIT ?1)"
        );
        let result = sqlx::query(&sql)
            .bind(keep as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn get(&self, data_type: DataType, id: &str) -> Result<Option<Record>, StorageError> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT body FROM records WHERE data_type = ?1 AND record_id = ?2",
        )
        .bind(data_type.store_name())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SqliteError::Database)?;

        match body {
            Some(body) => decode_json(&body).map(Some),
            None => Ok(None),
        }
    }

    async fn get_all(&self, data_type: DataType) -> Result<Vec<Record>, StorageError> {
        let bodies: Vec<String> = sqlx::query_scalar(
            "SELECT body FROM records WHERE data_type = ?1 ORDER BY record_id",
        )
        .bind(data_type.store_name())
        .fetch_all(&self.pool)
        .await
        .map_err(SqliteError::Database)?;

        bodies
            .iter()
            .map(|body| decode_json(body))
            .collect()
    }

    async fn put(&self, data_type: DataType, record: &Record) -> Result<(), StorageError> {
        let id = record
            .id()
            .ok_or_else(|| StorageError::Encoding("record has no id".into()))?;
        let body = serde_json::to_string(record).map_err(SqliteError::from)?;

        sqlx::query(
            r#"
            INSERT INTO records (data_type, record_id, body)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(data_type, record_id) DO UPDATE SET body = excluded.body
            "#,
        )
        .bind(data_type.store_name())
        .bind(id)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(SqliteError::Database)?;
        Ok(())
    }

    async fn delete(&self, data_type: DataType, id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM records WHERE data_type = ?1 AND record_id = ?2")
            .bind(data_type.store_name())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(SqliteError::Database)?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn save_item(&self, item: &SyncItem) -> Result<(), StorageError> {
        let mut stored = item.clone();
        if stored.status == ItemStatus::Syncing {
            stored.status = ItemStatus::Pending;
        }
        let bytes = stored.to_bytes().map_err(SqliteError::from)?;

        sqlx::query(
            r#"
            INSERT INTO queue_items (item_id, item)
            VALUES (?1, ?2)
            ON CONFLICT(item_id) DO UPDATE SET item = excluded.item
            "#,
        )
        .bind(item.id.as_bytes())
        .bind(bytes)
        .execute(&self.pool)
        .await
        .map_err(SqliteError::Database)?;
        Ok(())
    }

    async fn remove_items(&self, ids: &[ItemId]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }

        // Use a transaction for batch delete
        let mut tx = self.pool.begin().await.map_err(SqliteError::Database)?;
        for id in ids {
            sqlx::query("DELETE FROM queue_items WHERE item_id = ?1")
                .bind(id.as_bytes())
                .execute(&mut *tx)
                .await
                .map_err(SqliteError::Database)?;
        }
        tx.commit().await.map_err(SqliteError::Database)?;
        Ok(())
    }

    async fn load_items(&self) -> Result<Vec<SyncItem>, StorageError> {
        let rows: Vec<Vec<u8>> = sqlx::query_scalar("SELECT item FROM queue_items")
            .fetch_all(&self.pool)
            .await
            .map_err(SqliteError::Database)?;

        rows.iter()
            .map(|bytes| SyncItem::from_bytes(bytes).map_err(|e| StorageError::from(SqliteError::from(e))))
            .collect()
    }

    async fn save_checkpoint(
        &self,
        data_type: DataType,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (data_type, synced_at)
            VALUES (?1, ?2)
            ON CONFLICT(data_type) DO UPDATE SET synced_at = excluded.synced_at
            WHERE excluded.synced_at > checkpoints.synced_at
            "#,
        )
        .bind(data_type.store_name())
        .bind(encode_time(at))
        .execute(&self.pool)
        .await
        .map_err(SqliteError::Database)?;
        Ok(())
    }

    async fn load_checkpoints(&self) -> Result<Vec<(DataType, DateTime<Utc>)>, StorageError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT data_type, synced_at FROM checkpoints ORDER BY data_type")
                .fetch_all(&self.pool)
                .await
                .map_err(SqliteError::Database)?;

        let mut checkpoints = Vec::with_capacity(rows.len());
        for (name, at) in rows {
            checkpoints.push((decode_data_type(&name)?, decode_time(&at)?));
        }
        Ok(checkpoints)
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn save_conflict(&self, conflict: &Conflict) -> Result<(), StorageError> {
        let body = serde_json::to_string(conflict).map_err(SqliteError::from)?;

        sqlx::query(
            r#"
            INSERT INTO conflicts (conflict_id, status, detected_at, resolved_at, body)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(conflict_id) DO UPDATE SET
                status = excluded.status,
                resolved_at = excluded.resolved_at,
                body = excluded.body
            "#,
        )
        .bind(conflict.id.as_bytes())
        .bind(conflict.status.to_string())
        .bind(encode_time(conflict.detected_at))
        .bind(conflict.resolved_at.map(encode_time))
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(SqliteError::Database)?;

        if conflict.is_resolved() {
            let dropped = self.trim_conflicts().await?;
            if dropped > 0 {
                tracing::debug!("Dropped {} old resolved conflict(s)", dropped);
            }
        }
        Ok(())
    }

    async fn load_conflict(&self, id: &ConflictId) -> Result<Option<Conflict>, StorageError> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM conflicts WHERE conflict_id = ?1")
                .bind(id.as_bytes())
                .fetch_optional(&self.pool)
                .await
                .map_err(SqliteError::Database)?;

        match body {
            Some(body) => decode_json(&body).map(Some),
            None => Ok(None),
        }
    }

    async fn load_conflicts(&self) -> Result<Vec<Conflict>, StorageError> {
        let bodies: Vec<String> =
            sqlx::query_scalar("SELECT body FROM conflicts ORDER BY detected_at, rowid")
                .fetch_all(&self.pool)
                .await
                .map_err(SqliteError::Database)?;

        bodies
            .iter()
            .map(|body| decode_json(body))
            .collect()
    }

    async fn save_backup(&self, backup: &Backup) -> Result<(), StorageError> {
        let body = serde_json::to_string(backup).map_err(SqliteError::from)?;

        sqlx::query("INSERT INTO backups (backup_id, conflict_id, body) VALUES (?1, ?2, ?3)")
            .bind(backup.id.as_bytes())
            .bind(backup.conflict_id.as_bytes())
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(SqliteError::Database)?;

        self.trim_log("backups", self.limits.max_backups).await?;
        Ok(())
    }

    async fn load_backups(&self, conflict_id: &ConflictId) -> Result<Vec<Backup>, StorageError> {
        let bodies: Vec<String> =
            sqlx::query_scalar("SELECT body FROM backups WHERE conflict_id = ?1 ORDER BY seq")
                .bind(conflict_id.as_bytes())
                .fetch_all(&self.pool)
                .await
                .map_err(SqliteError::Database)?;

        bodies
            .iter()
            .map(|body| decode_json(body))
            .collect()
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        let body = serde_json::to_string(entry).map_err(SqliteError::from)?;

        sqlx::query("INSERT INTO audit (audit_id, body) VALUES (?1, ?2)")
            .bind(entry.id.as_bytes())
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(SqliteError::Database)?;

        self.trim_log("audit", self.limits.max_audit_entries).await?;
        Ok(())
    }

    async fn load_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        let bodies: Vec<String> =
            sqlx::query_scalar("SELECT body FROM audit ORDER BY seq DESC LIMIT ?1")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(SqliteError::Database)?;

        bodies
            .iter()
            .map(|body| decode_json(body))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resync_types::{
        AuditId, AuditKind, BackupId, Operation, Priority, Severity, Side, SuggestedResolution,
    };
    use serde_json::json;

    fn record(id: &str) -> Record {
        Record::from_value(json!({"id": id, "name": "Ada", "updatedAt": "2024-05-01T10:00:00Z"}))
            .unwrap()
    }

    fn conflict(status: ConflictStatus, resolved_at: Option<DateTime<Utc>>) -> Conflict {
        Conflict {
            id: ConflictId::new(),
            data_type: DataType::Contacts,
            record_id: "c1".into(),
            local_record: record("c1"),
            remote_record: record("c1").with("name", "Ada L."),
            field_conflicts: vec![],
            priority: Severity::High,
            status,
            suggested_resolution: SuggestedResolution::Manual,
            detected_at: Utc::now(),
            resolved_at,
            resolution: None,
        }
    }

    fn audit(n: usize) -> AuditEntry {
        AuditEntry {
            id: AuditId::new(),
            conflict_id: ConflictId::new(),
            data_type: DataType::Tasks,
            record_id: format!("t{}", n),
            kind: AuditKind::Detected,
            strategy: None,
            winner: None,
            duration_ms: 0,
            at: Utc::now(),
            detail: None,
        }
    }

    #[tokio::test]
    async fn records_round_trip_per_data_type() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put(DataType::Contacts, &record("c1")).await.unwrap();
        store.put(DataType::Tasks, &record("c1")).await.unwrap();

        let updated = record("c1").with("name", "Grace");
        store.put(DataType::Contacts, &updated).await.unwrap();

        assert_eq!(
            store.get(DataType::Contacts, "c1").await.unwrap(),
            Some(updated)
        );
        assert_eq!(store.get_all(DataType::Tasks).await.unwrap().len(), 1);

        store.delete(DataType::Contacts, "c1").await.unwrap();
        assert!(store.get(DataType::Contacts, "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_without_id_is_an_encoding_error() {
        let store = SqliteStore::in_memory().await.unwrap();
        let result = store.put(DataType::Tasks, &Record::new()).await;
        assert!(matches!(result, Err(StorageError::Encoding(_))));
    }

    #[tokio::test]
    async fn queue_items_persist_without_syncing_state() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut item = SyncItem::new(
            Operation::Update,
            "contacts",
            record("c1"),
            Priority::High,
            Utc::now(),
        );
        item.status = ItemStatus::Syncing;
        item.attempts = 2;
        store.save_item(&item).await.unwrap();

        let loaded = store.load_items().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, ItemStatus::Pending);
        assert_eq!(loaded[0].attempts, 2);
        assert_eq!(loaded[0].payload, item.payload);

        store.remove_items(&[item.id]).await.unwrap();
        assert!(store.load_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkpoints_only_move_forward() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        store.save_checkpoint(DataType::Events, now).await.unwrap();
        store
            .save_checkpoint(DataType::Events, now - chrono::Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(
            store.load_checkpoints().await.unwrap(),
            vec![(DataType::Events, now)]
        );
    }

    #[tokio::test]
    async fn resolved_conflicts_are_bounded_but_open_ones_kept() {
        let store = SqliteStore::in_memory().await.unwrap().with_limits(HistoryLimits {
            max_conflicts: 2,
            ..HistoryLimits::default()
        });

        let open = conflict(ConflictStatus::RequiresManual, None);
        store.save_conflict(&open).await.unwrap();

        let start = Utc::now();
        let mut resolved = Vec::new();
        for i in 0..3 {
            let c = conflict(
                ConflictStatus::Resolved,
                Some(start + chrono::Duration::seconds(i)),
            );
            store.save_conflict(&c).await.unwrap();
            resolved.push(c.id);
        }

        let kept: Vec<ConflictId> = store
            .load_conflicts()
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(kept.len(), 3);
        assert!(kept.contains(&open.id));
        assert!(!kept.contains(&resolved[0]));
    }

    #[tokio::test]
    async fn conflict_upsert_updates_status() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut c = conflict(ConflictStatus::RequiresManual, None);
        store.save_conflict(&c).await.unwrap();

        c.status = ConflictStatus::Resolved;
        c.resolved_at = Some(Utc::now());
        store.save_conflict(&c).await.unwrap();

        let loaded = store.load_conflict(&c.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ConflictStatus::Resolved);
        assert_eq!(store.load_conflicts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn backups_are_bounded() {
        let store = SqliteStore::in_memory().await.unwrap().with_limits(HistoryLimits {
            max_backups: 2,
            ..HistoryLimits::default()
        });
        let conflict_id = ConflictId::new();

        for i in 0..3 {
            let backup = Backup {
                id: BackupId::new(),
                conflict_id,
                data_type: DataType::Contacts,
                record_id: "c1".into(),
                side: Side::Local,
                reason: format!("snapshot {}", i),
                record: record("c1"),
                created_at: Utc::now(),
            };
            store.save_backup(&backup).await.unwrap();
        }

        let backups = store.load_backups(&conflict_id).await.unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].reason, "snapshot 1");
    }

    #[tokio::test]
    async fn audit_is_bounded_and_newest_first() {
        let store = SqliteStore::in_memory().await.unwrap().with_limits(HistoryLimits {
            max_audit_entries: 3,
            ..HistoryLimits::default()
        });
        for i in 0..5 {
            store.append_audit(&audit(i)).await.unwrap();
        }

        let entries = store.load_audit(10).await.unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(ids, vec!["t4", "t3", "t2"]);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.db");

        {
            let store = SqliteStore::new(&path).await.unwrap();
            store.put(DataType::Tasks, &record("t1")).await.unwrap();
        }

        let store = SqliteStore::new(&path).await.unwrap();
        assert!(store.get(DataType::Tasks, "t1").await.unwrap().is_some());
    }
}

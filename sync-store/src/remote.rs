//! A remote store kept in its own SQLite database.
//!
//! Lets the CLI and integration tests run full cycles without a network
//! service. Stale detection compares record timestamps the same way a real
//! remote would.

use crate::error::{SqliteError, SqliteResult};
use crate::sqlite::{memory_pool, open_pool};
use async_trait::async_trait;
use resync_client::{RemoteTransport, TransportError};
use resync_types::{DataType, Operation, Record};
use sqlx::SqlitePool;
use std::path::Path;

/// Authoritative record store backed by SQLite.
#[derive(Clone)]
pub struct SqliteRemote {
    pool: SqlitePool,
}

impl SqliteRemote {
    /// Open (or create) a remote database at the given path.
    pub async fn new(path: &Path) -> SqliteResult<Self> {
        let remote = Self {
            pool: open_pool(path).await?,
        };
        remote.run_migrations().await?;
        tracing::debug!("Opened remote at {}", path.display());
        Ok(remote)
    }

    /// Create an in-memory remote (for testing).
    pub async fn in_memory() -> SqliteResult<Self> {
        let remote = Self {
            pool: memory_pool().await?,
        };
        remote.run_migrations().await?;
        Ok(remote)
    }

    async fn run_migrations(&self) -> SqliteResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS remote_records (
                data_type TEXT NOT NULL,
                record_id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (data_type, record_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write a record directly, bypassing stale checks.
    pub async fn insert(&self, data_type: DataType, record: &Record) -> SqliteResult<()> {
        let id = record
            .id()
            .ok_or_else(|| SqliteError::Encoding("record has no id".into()))?;
        sqlx::query(
            r#"
            INSERT INTO remote_records (data_type, record_id, body)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(data_type, record_id) DO UPDATE SET body = excluded.body
            "#,
        )
        .bind(data_type.store_name())
        .bind(id)
        .bind(serde_json::to_string(record)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read one record.
    pub async fn fetch(&self, data_type: DataType, id: &str) -> SqliteResult<Option<Record>> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT body FROM remote_records WHERE data_type = ?1 AND record_id = ?2",
        )
        .bind(data_type.store_name())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Number of records held for a data type.
    pub async fn count(&self, data_type: DataType) -> SqliteResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM remote_records WHERE data_type = ?1")
                .bind(data_type.store_name())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn apply_batch(
        &self,
        data_type: DataType,
        operation: Operation,
        records: &[Record],
    ) -> Result<(), TransportError> {
        let mut tx = self.pool.begin().await.map_err(SqliteError::Database)?;
        let mut stale = Vec::new();

        for record in records {
            let id = record
                .id()
                .ok_or_else(|| TransportError::Rejected("record has no id".into()))?;

            let existing: Option<String> = sqlx::query_scalar(
                "SELECT body FROM remote_records WHERE data_type = ?1 AND record_id = ?2",
            )
            .bind(data_type.store_name())
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(SqliteError::Database)?;

            if let Some(body) = existing {
                let theirs: Record = serde_json::from_str(&body).map_err(SqliteError::from)?;
                let newer = match (theirs.timestamp(), record.timestamp()) {
                    (Some(theirs), Some(ours)) => theirs > ours,
                    (Some(_), None) => true,
                    _ => false,
                };
                if newer {
                    stale.push(id);
                    continue;
                }
            }

            match operation {
                Operation::Create | Operation::Update => {
                    let body = serde_json::to_string(record).map_err(SqliteError::from)?;
                    sqlx::query(
                        r#"
                        INSERT INTO remote_records (data_type, record_id, body)
                        VALUES (?1, ?2, ?3)
                        ON CONFLICT(data_type, record_id) DO UPDATE SET body = excluded.body
                        "#,
                    )
                    .bind(data_type.store_name())
                    .bind(&id)
                    .bind(body)
                    .execute(&mut *tx)
                    .await
                    .map_err(SqliteError::Database)?;
                }
                Operation::Delete => {
                    sqlx::query(
                        "DELETE FROM remote_records WHERE data_type = ?1 AND record_id = ?2",
                    )
                    .bind(data_type.store_name())
                    .bind(&id)
                    .execute(&mut *tx)
                    .await
                    .map_err(SqliteError::Database)?;
                }
            }
        }

        if !stale.is_empty() {
            tx.rollback().await.map_err(SqliteError::Database)?;
            return Err(TransportError::Stale { record_ids: stale });
        }

        tx.commit().await.map_err(SqliteError::Database)?;
        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for SqliteRemote {
    async fn upload_batch(
        &self,
        data_type: DataType,
        operation: Operation,
        records: &[Record],
    ) -> Result<(), TransportError> {
        tracing::debug!(
            "Uploading {} {} record(s) to {}",
            records.len(),
            operation,
            data_type
        );
        self.apply_batch(data_type, operation, records).await
    }

    async fn read_remote(
        &self,
        data_type: DataType,
        id: &str,
    ) -> Result<Option<Record>, TransportError> {
        Ok(self.fetch(data_type, id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str, updated_at: &str) -> Record {
        Record::from_value(json!({"id": id, "title": "Ship it", "updatedAt": updated_at})).unwrap()
    }

    #[tokio::test]
    async fn upload_then_read() {
        let remote = SqliteRemote::in_memory().await.unwrap();
        let records = vec![
            task("t1", "2024-05-01T10:00:00Z"),
            task("t2", "2024-05-01T10:00:00Z"),
        ];
        remote
            .upload_batch(DataType::Tasks, Operation::Create, &records)
            .await
            .unwrap();

        assert_eq!(remote.count(DataType::Tasks).await.unwrap(), 2);
        assert_eq!(
            remote.read_remote(DataType::Tasks, "t1").await.unwrap(),
            Some(records[0].clone())
        );
        assert!(remote
            .read_remote(DataType::Contacts, "t1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn stale_batch_applies_nothing() {
        let remote = SqliteRemote::in_memory().await.unwrap();
        remote
            .insert(DataType::Tasks, &task("t1", "2024-05-02T10:00:00Z"))
            .await
            .unwrap();

        let batch = vec![
            task("t1", "2024-05-01T10:00:00Z"),
            task("t2", "2024-05-01T10:00:00Z"),
        ];
        let result = remote
            .upload_batch(DataType::Tasks, Operation::Update, &batch)
            .await;

        assert_eq!(
            result,
            Err(TransportError::Stale {
                record_ids: vec!["t1".into()]
            })
        );
        assert!(remote.fetch(DataType::Tasks, "t2").await.unwrap().is_none());
        assert_eq!(
            remote.fetch(DataType::Tasks, "t1").await.unwrap(),
            Some(task("t1", "2024-05-02T10:00:00Z"))
        );
    }

    #[tokio::test]
    async fn newer_upload_replaces_and_delete_removes() {
        let remote = SqliteRemote::in_memory().await.unwrap();
        remote
            .insert(DataType::Tasks, &task("t1", "2024-05-01T10:00:00Z"))
            .await
            .unwrap();

        let newer = task("t1", "2024-05-03T10:00:00Z");
        remote
            .upload_batch(DataType::Tasks, Operation::Update, &[newer.clone()])
            .await
            .unwrap();
        assert_eq!(remote.fetch(DataType::Tasks, "t1").await.unwrap(), Some(newer.clone()));

        remote
            .upload_batch(DataType::Tasks, Operation::Delete, &[newer])
            .await
            .unwrap();
        assert_eq!(remote.count(DataType::Tasks).await.unwrap(), 0);
    }
}

//! Mock transport for testing.
//!
//! Keeps the remote store in memory, records every upload, and lets tests
//! script failures.

use super::{RemoteTransport, TransportError};
use async_trait::async_trait;
use resync_types::{DataType, Operation, Record};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded `upload_batch()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadCall {
    /// Target store.
    pub data_type: DataType,
    /// Operation applied.
    pub operation: Operation,
    /// Records sent.
    pub records: Vec<Record>,
    /// Whether the call succeeded.
    pub succeeded: bool,
}

/// Mock transport for testing.
///
/// A record is stale when the remote copy carries a later timestamp than the
/// uploaded one; stale batches are refused as a whole.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    offline: bool,
    remote: BTreeMap<(DataType, String), Record>,
    uploads: Vec<UploadCall>,
    fail_next_upload: Option<TransportError>,
    fail_upload_calls: HashMap<usize, TransportError>,
    fail_next_read: Option<TransportError>,
    force_stale: HashSet<String>,
}

impl MockTransport {
    /// Create a new mock transport with an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a record into the remote store.
    pub fn insert_remote(&self, data_type: DataType, record: Record) {
        let mut inner = self.lock();
        let id = record.id().unwrap_or_default();
        inner.remote.insert((data_type, id), record);
    }

    /// Current remote version of a record.
    pub fn remote(&self, data_type: DataType, id: &str) -> Option<Record> {
        let inner = self.lock();
        inner.remote.get(&(data_type, id.to_string())).cloned()
    }

    /// Number of records held remotely for a data type.
    pub fn remote_count(&self, data_type: DataType) -> usize {
        let inner = self.lock();
        inner.remote.keys().filter(|(dt, _)| *dt == data_type).count()
    }

    /// All upload calls so far, including failed ones.
    pub fn uploads(&self) -> Vec<UploadCall> {
        self.lock().uploads.clone()
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Cause the next `upload_batch()` to fail with the given error.
    pub fn fail_next_upload(&self, error: TransportError) {
        self.lock().fail_next_upload = Some(error);
    }

    /// Cause the `call`-th `upload_batch()` (1-based, counting every call
    /// since creation) to fail with the given error.
    pub fn fail_upload_call(&self, call: usize, error: TransportError) {
        self.lock().fail_upload_calls.insert(call, error);
    }

    /// Cause the next `read_remote()` to fail with the given error.
    pub fn fail_next_read(&self, error: TransportError) {
        self.lock().fail_next_read = Some(error);
    }

    /// Report a record as stale on every upload, whatever its timestamp.
    pub fn force_stale(&self, id: &str) {
        self.lock().force_stale.insert(id.to_string());
    }

    /// Clear all state (remote, recorded calls, scripted failures).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl MockTransportInner {
    fn stale_ids(&self, data_type: DataType, records: &[Record]) -> Vec<String> {
        records
            .iter()
            .filter_map(|record| {
                let id = record.id()?;
                if self.force_stale.contains(&id) {
                    return Some(id);
                }
                let existing = self.remote.get(&(data_type, id.clone()))?;
                match (existing.timestamp(), record.timestamp()) {
                    (Some(theirs), Some(ours)) if theirs > ours => Some(id),
                    (Some(_), None) => Some(id),
                    _ => None,
                }
            })
            .collect()
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn upload_batch(
        &self,
        data_type: DataType,
        operation: Operation,
        records: &[Record],
    ) -> Result<(), TransportError> {
        let mut inner = self.lock();
        let call = inner.uploads.len() + 1;

        let scripted = inner
            .fail_next_upload
            .take()
            .or_else(|| inner.fail_upload_calls.remove(&call));
        let result = if inner.offline {
            Err(TransportError::ConnectionFailed("offline".into()))
        } else if let Some(error) = scripted {
            Err(error)
        } else {
            let stale = inner.stale_ids(data_type, records);
            if stale.is_empty() {
                Ok(())
            } else {
                Err(TransportError::Stale { record_ids: stale })
            }
        };

        if result.is_ok() {
            for record in records {
                let key = (data_type, record.id().unwrap_or_default());
                match operation {
                    Operation::Create | Operation::Update => {
                        inner.remote.insert(key, record.clone());
                    }
                    Operation::Delete => {
                        inner.remote.remove(&key);
                    }
                }
            }
        }

        inner.uploads.push(UploadCall {
            data_type,
            operation,
            records: records.to_vec(),
            succeeded: result.is_ok(),
        });
        result
    }

    async fn read_remote(
        &self,
        data_type: DataType,
        id: &str,
    ) -> Result<Option<Record>, TransportError> {
        let mut inner = self.lock();

        if inner.offline {
            return Err(TransportError::ConnectionFailed("offline".into()));
        }
        if let Some(error) = inner.fail_next_read.take() {
            return Err(error);
        }

        Ok(inner.remote.get(&(data_type, id.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str, updated: &str) -> Record {
        Record::from_value(json!({"id": id, "title": "Ship", "updatedAt": updated})).unwrap()
    }

    #[tokio::test]
    async fn uploads_apply_to_remote() {
        let transport = MockTransport::new();
        let record = task("t1", "2024-01-01T00:00:00Z");

        transport
            .upload_batch(DataType::Tasks, Operation::Create, &[record.clone()])
            .await
            .unwrap();

        assert_eq!(transport.remote(DataType::Tasks, "t1"), Some(record));
        assert_eq!(transport.uploads().len(), 1);
        assert!(transport.uploads()[0].succeeded);
    }

    #[tokio::test]
    async fn delete_removes_remote_record() {
        let transport = MockTransport::new();
        transport.insert_remote(DataType::Tasks, task("t1", "2024-01-01T00:00:00Z"));

        transport
            .upload_batch(
                DataType::Tasks,
                Operation::Delete,
                &[task("t1", "2024-01-02T00:00:00Z")],
            )
            .await
            .unwrap();

        assert_eq!(transport.remote_count(DataType::Tasks), 0);
    }

    #[tokio::test]
    async fn older_upload_is_stale_and_not_applied() {
        let transport = MockTransport::new();
        transport.insert_remote(DataType::Tasks, task("t1", "2024-01-05T00:00:00Z"));

        let result = transport
            .upload_batch(
                DataType::Tasks,
                Operation::Update,
                &[task("t1", "2024-01-01T00:00:00Z"), task("t2", "2024-01-01T00:00:00Z")],
            )
            .await;

        assert_eq!(
            result,
            Err(TransportError::Stale {
                record_ids: vec!["t1".into()]
            })
        );
        assert!(transport.remote(DataType::Tasks, "t2").is_none());
    }

    #[tokio::test]
    async fn scripted_failures_fire_once() {
        let transport = MockTransport::new();
        transport.fail_next_upload(TransportError::Timeout);
        let record = task("t1", "2024-01-01T00:00:00Z");

        let first = transport
            .upload_batch(DataType::Tasks, Operation::Create, &[record.clone()])
            .await;
        assert_eq!(first, Err(TransportError::Timeout));

        transport
            .upload_batch(DataType::Tasks, Operation::Create, &[record])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn nth_call_failure() {
        let transport = MockTransport::new();
        transport.fail_upload_call(2, TransportError::Rejected("quota".into()));
        let record = task("t1", "2024-01-01T00:00:00Z");

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            let result = transport
                .upload_batch(DataType::Tasks, Operation::Update, &[record.clone()])
                .await;
            outcomes.push(result.is_ok());
        }
        assert_eq!(outcomes, vec![true, false, true]);
    }

    #[tokio::test]
    async fn offline_fails_everything() {
        let transport = MockTransport::new();
        transport.set_offline(true);

        assert!(transport.read_remote(DataType::Tasks, "t1").await.is_err());
        assert!(matches!(
            transport
                .upload_batch(DataType::Tasks, Operation::Create, &[])
                .await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let transport = MockTransport::new();
        let other = transport.clone();
        other.insert_remote(DataType::Events, Record::new().with("id", "e1"));
        assert_eq!(transport.remote_count(DataType::Events), 1);
    }
}

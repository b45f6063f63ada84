//! Remote transport abstraction for resync.
//!
//! The remote store is the authority. The queue only needs two calls from it:
//! - `upload_batch()` applies a batch of records sharing one operation
//! - `read_remote()` fetches the remote version of one record
//!
//! Wire framing is the implementation's concern. [`MockTransport`] keeps the
//! remote in memory for tests.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport
//!     .upload_batch(DataType::Tasks, Operation::Create, &[record])
//!     .await?;
//! let remote = transport.read_remote(DataType::Tasks, "t1").await?;
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use resync_types::{DataType, Operation, Record};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Credentials were refused.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The call did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The remote refused the batch for another reason.
    #[error("rejected by remote: {0}")]
    Rejected(String),

    /// The remote holds newer versions of some records. Nothing in the batch
    /// was applied.
    #[error("remote has newer versions of {} record(s)", record_ids.len())]
    Stale {
        /// Ids of the records whose remote version is newer.
        record_ids: Vec<String>,
    },
}

/// Transport trait for talking to the authoritative remote store.
///
/// Implementations handle the underlying connection mechanism
/// (HTTP, a database, mock, etc).
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Apply one batch of records.
    ///
    /// Must be all-or-nothing: on error, no record of the batch was applied.
    async fn upload_batch(
        &self,
        data_type: DataType,
        operation: Operation,
        records: &[Record],
    ) -> Result<(), TransportError>;

    /// Fetch the remote version of a record, if it exists.
    async fn read_remote(
        &self,
        data_type: DataType,
        id: &str,
    ) -> Result<Option<Record>, TransportError>;
}

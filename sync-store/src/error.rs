//! Error types for sync-store.

use resync_client::{StorageError, TransportError};
use std::path::PathBuf;

/// SQLite backend errors.
#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded, or a value could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

impl From<serde_json::Error> for SqliteError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encoding(e.to_string())
    }
}

impl From<resync_types::SyncError> for SqliteError {
    fn from(e: resync_types::SyncError) -> Self {
        Self::Encoding(e.to_string())
    }
}

impl From<SqliteError> for StorageError {
    fn from(e: SqliteError) -> Self {
        match e {
            SqliteError::Encoding(reason) => StorageError::Encoding(reason),
            SqliteError::Database(sqlx::Error::PoolTimedOut) => {
                StorageError::Unavailable("connection pool timed out".into())
            }
            other => StorageError::Backend(Box::new(other)),
        }
    }
}

impl From<SqliteError> for TransportError {
    fn from(e: SqliteError) -> Self {
        match e {
            SqliteError::Database(sqlx::Error::PoolTimedOut) => TransportError::Timeout,
            other => TransportError::ConnectionFailed(other.to_string()),
        }
    }
}

/// Result type alias for SQLite operations.
pub type SqliteResult<T> = std::result::Result<T, SqliteError>;

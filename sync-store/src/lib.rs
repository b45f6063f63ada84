//! # sync-store
//!
//! SQLite persistence for resync.
//!
//! - [`SqliteStore`] implements the client's `LocalStore`, `QueueStore` and
//!   `HistoryStore` traits in one database file
//! - [`SqliteRemote`] is an authoritative remote kept in a second database,
//!   used by the CLI and for end-to-end tests
//!
//! ## Example
//!
//! ```ignore
//! use resync_store::{SqliteRemote, SqliteStore};
//!
//! let store = SqliteStore::new(Path::new("local.db")).await?;
//! let remote = SqliteRemote::new(Path::new("remote.db")).await?;
//! let queue = SyncQueue::new(config, Arc::new(store), Arc::new(remote));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod remote;
pub mod sqlite;

pub use error::{SqliteError, SqliteResult};
pub use remote::SqliteRemote;
pub use sqlite::SqliteStore;

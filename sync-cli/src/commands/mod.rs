//! CLI command implementations.

pub mod audit;
pub mod conflicts;
pub mod enqueue;
pub mod status;
pub mod sync;

use anyhow::{Context, Result};
use resync_client::SyncQueue;
use resync_store::{SqliteRemote, SqliteStore};
use std::path::Path;
use std::sync::Arc;

use crate::config::CliConfig;

/// The queue every command drives.
pub type Queue = SyncQueue<SqliteStore, SqliteRemote>;

/// Open both databases and restore the queue.
pub async fn open(data_dir: &Path, config: &CliConfig) -> Result<Queue> {
    let database = config.database_path(data_dir);
    let store = SqliteStore::new(&database)
        .await
        .with_context(|| format!("Failed to open local database {}", database.display()))?
        .with_limits(config.sync.history_limits());

    let remote_path = config.remote_path(data_dir);
    let remote = SqliteRemote::new(&remote_path)
        .await
        .with_context(|| format!("Failed to open remote database {}", remote_path.display()))?;

    let queue = SyncQueue::new(config.sync.clone(), Arc::new(store), Arc::new(remote));
    let restored = queue
        .load_queue()
        .await
        .context("Failed to restore the sync queue")?;
    tracing::debug!(
        "Opened {} with {} queued item(s)",
        database.display(),
        restored
    );
    Ok(queue)
}

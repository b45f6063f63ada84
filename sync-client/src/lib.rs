//! # sync-client
//!
//! Async runtime for resync, the offline record reconciliation engine.
//!
//! Applications buffer local mutations in a [`SyncQueue`]; the queue uploads
//! them in batches and hands records the remote refuses as stale to the
//! [`ConflictEngine`].
//!
//! ## Features
//!
//! - **Durable queue**: priority ordering, bounded retries with backoff
//! - **Conflict resolution**: automatic strategies with a manual fallback
//! - **Collaborator traits**: pluggable local store and remote transport
//! - **Pure State Machine**: scheduling logic lives in sync-core
//!
//! ## Example
//!
//! ```ignore
//! use resync_client::{MemoryStore, MockTransport, SyncConfig, SyncQueue};
//!
//! let queue = SyncQueue::new(SyncConfig::default(), store, transport);
//! queue.load_queue().await?;
//!
//! queue.enqueue(Operation::Update, "contacts", payload, Priority::Normal).await?;
//! let report = queue.run_cycle(false).await?;
//!
//! for request in queue.engine().pending_manual().await {
//!     queue.resolve_manual(request.conflict_id, ManualDecision::KeepLocal).await?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod transport;

pub use config::{ConfigError, SyncConfig};
pub use engine::{ConflictEngine, EngineError, Handled, Resolved};
pub use queue::{CycleReport, QueueError, SyncQueue};
pub use scheduler::{spawn_scheduler, SchedulerHandle, Trigger};
pub use store::{
    HistoryLimits, HistoryStore, LocalStore, MemoryStore, QueueStore, Storage, StorageError,
};
pub use transport::{MockTransport, RemoteTransport, TransportError};

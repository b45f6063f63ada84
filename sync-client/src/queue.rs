//! SyncQueue - the durable upload queue.
//!
//! The queue keeps its bookkeeping in a [`PendingQueue`] from `resync-core`
//! and its run flag in the pure [`SchedulerState`] machine; this module
//! performs the I/O around them.
//!
//! # Example
//!
//! ```ignore
//! let queue = SyncQueue::new(config, Arc::new(store), Arc::new(transport));
//! queue.load_queue().await?;
//! queue
//!     .enqueue(Operation::Create, "tasks", json!({"id": "t1", "title": "Ship"}), Priority::High)
//!     .await?;
//! let report = queue.run_cycle(false).await?;
//! ```

use chrono::{DateTime, Utc};
use resync_core::{
    group_batches, validate_record, Action, Batch, Event, PendingQueue, QueueStats,
    SchedulerState, SkipReason,
};
use resync_types::{
    ConflictId, DataType, ItemId, ManualDecision, Operation, Priority, Record, SyncItem,
    ValidationError,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::config::SyncConfig;
use crate::engine::{ConflictEngine, EngineError, Handled, Resolved};
use crate::scheduler::{Trigger, TRIGGER_CAPACITY};
use crate::store::{Storage, StorageError};
use crate::transport::{RemoteTransport, TransportError};

/// Queue errors.
///
/// Upload failures never appear here: they are recorded on the items.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The mutation can never be synchronised.
    #[error("invalid mutation: {0}")]
    Validation(#[from] ValidationError),

    /// Durable queue state could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The conflict engine failed.
    #[error("conflict engine error: {0}")]
    Engine(#[from] EngineError),
}

/// What one call to [`SyncQueue::run_cycle`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Set when the cycle did not run.
    pub skipped: Option<SkipReason>,
    /// Batches uploaded or attempted.
    pub batches: usize,
    /// Items uploaded and evicted.
    pub completed: usize,
    /// Items whose attempt failed.
    pub failed: usize,
    /// Items failed terminally because they can never be uploaded.
    pub rejected: usize,
    /// Conflicts resolved automatically.
    pub conflicts_resolved: usize,
    /// Conflicts routed to manual resolution.
    pub conflicts_deferred: usize,
    /// Stale items settled by taking the remote version.
    pub remote_applied: usize,
    /// Failed items reset by [`SyncQueue::retry_failed_items`].
    pub retried: usize,
    /// The cycle stopped early on request.
    pub stopped: bool,
}

impl CycleReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// How a stale record was settled.
enum HandOff {
    /// Evict the item, optionally queueing the resolved record.
    Evict(Option<Record>),
    /// Count it as an ordinary failed attempt.
    Fail(String),
}

/// Outcome of one batch, applied to the queue in one step.
#[derive(Default)]
struct BatchOutcome {
    evict: Vec<ItemId>,
    fail: Vec<(ItemId, String)>,
    reject: Vec<ItemId>,
    reject_error: String,
    requeue: Vec<SyncItem>,
}

/// Sends `CycleFinished` when a cycle ends, however it ends.
struct CycleGuard<'a> {
    state: &'a StdMutex<SchedulerState>,
    stop: &'a AtomicBool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.stop.store(false, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (next, _) = (*state).on_event(Event::CycleFinished);
        *state = next;
    }
}

/// Durable, priority-ordered upload queue.
pub struct SyncQueue<S: Storage, T: RemoteTransport> {
    config: SyncConfig,
    store: Arc<S>,
    transport: Arc<T>,
    engine: ConflictEngine<S, T>,
    queue: Mutex<PendingQueue>,
    state: StdMutex<SchedulerState>,
    batch_lock: Mutex<()>,
    stop: AtomicBool,
    triggers: mpsc::Sender<Trigger>,
    trigger_rx: StdMutex<Option<mpsc::Receiver<Trigger>>>,
}

impl<S: Storage, T: RemoteTransport> SyncQueue<S, T> {
    /// Create an empty queue. Call [`load_queue`](Self::load_queue) to
    /// restore persisted items.
    pub fn new(config: SyncConfig, store: Arc<S>, transport: Arc<T>) -> Self {
        let (triggers, trigger_rx) = mpsc::channel(TRIGGER_CAPACITY);
        let engine = ConflictEngine::new(Arc::clone(&store), Arc::clone(&transport), &config);
        Self {
            queue: Mutex::new(PendingQueue::new(config.retry_attempts)),
            config,
            store,
            transport,
            engine,
            state: StdMutex::new(SchedulerState::new()),
            batch_lock: Mutex::new(()),
            stop: AtomicBool::new(false),
            triggers,
            trigger_rx: StdMutex::new(Some(trigger_rx)),
        }
    }

    /// The configuration this queue runs with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The conflict engine used for stale uploads.
    pub fn engine(&self) -> &ConflictEngine<S, T> {
        &self.engine
    }

    /// Current scheduler state.
    pub fn state(&self) -> SchedulerState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sender for feeding triggers to a running scheduler task.
    pub fn trigger_sender(&self) -> mpsc::Sender<Trigger> {
        self.triggers.clone()
    }

    /// Take the receiving end of the trigger channel. Only the first call
    /// gets it.
    pub fn take_trigger_receiver(&self) -> Option<mpsc::Receiver<Trigger>> {
        self.trigger_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn on_event(&self, event: Event) -> Vec<Action> {
        let mut state = self.lock_state();
        let (next, actions) = (*state).on_event(event);
        *state = next;
        actions
    }

    fn dispatch(&self, actions: Vec<Action>) {
        for action in actions {
            let trigger = match action {
                Action::RequestCycle { force } => Trigger::RunCycle { force },
                Action::RequestCycleAfter { delay } => Trigger::RunCycleAfter(delay),
                _ => continue,
            };
            // No scheduler running, or one already has a backlog.
            if self.triggers.try_send(trigger).is_err() {
                tracing::debug!("Cycle request dropped");
            }
        }
    }

    /// Buffer a local mutation.
    ///
    /// A high-priority item schedules a near-immediate cycle when the queue
    /// is idle and online.
    pub async fn enqueue(
        &self,
        operation: Operation,
        store_name: &str,
        payload: Value,
        priority: Priority,
    ) -> Result<ItemId, QueueError> {
        DataType::from_store_name(store_name)?;
        let record = Record::from_value(payload)?;

        let item = SyncItem::new(operation, store_name, record, priority, Utc::now());
        let id = item.id;
        self.store.save_item(&item).await?;
        self.queue.lock().await.push(item);
        tracing::debug!("Enqueued {} {} item {} ({})", operation, store_name, id, priority);

        if priority == Priority::High {
            let actions = self.on_event(Event::HighPriorityEnqueued);
            self.dispatch(actions);
        }
        Ok(id)
    }

    /// Rebuild the in-memory queue from durable storage.
    ///
    /// Completed leftovers are purged. Returns the number of live items.
    pub async fn load_queue(&self) -> Result<usize, QueueError> {
        let items = self.store.load_items().await?;
        let total = items.len();
        let stored: Vec<ItemId> = items.iter().map(|item| item.id).collect();
        let queue = PendingQueue::from_items(items, self.config.retry_attempts);

        let live: HashSet<ItemId> = queue.iter().map(|item| item.id).collect();
        let stale: Vec<ItemId> = stored
            .into_iter()
            .filter(|id| !live.contains(id))
            .collect();
        if !stale.is_empty() {
            self.store.remove_items(&stale).await?;
        }

        self.engine.load().await?;
        let count = queue.len();
        *self.queue.lock().await = queue;
        tracing::info!("Loaded {} queued item(s) ({} purged)", count, total - count);
        Ok(count)
    }

    /// Upload eligible items in batches.
    ///
    /// Does nothing when offline, or when a cycle is running and `force` is
    /// not set. Batches run one at a time even when forced. Upload failures
    /// are recorded on the items and never returned.
    pub async fn run_cycle(&self, force: bool) -> Result<CycleReport, QueueError> {
        let mut began = false;
        for action in self.on_event(Event::CycleRequested { force }) {
            match action {
                Action::SkipCycle { reason } => {
                    tracing::debug!("Cycle skipped: {:?}", reason);
                    return Ok(CycleReport::skipped(reason));
                }
                Action::BeginCycle { .. } => began = true,
                _ => {}
            }
        }
        if !began {
            return Ok(CycleReport::default());
        }
        let _cycle = CycleGuard {
            state: &self.state,
            stop: &self.stop,
        };

        let _batches = self.batch_lock.lock().await;
        let started = Utc::now();
        let mut report = CycleReport::default();
        let mut attempted: HashSet<ItemId> = HashSet::new();
        tracing::info!("Sync cycle started (forced: {})", force);

        'rounds: loop {
            let selected = {
                let queue = self.queue.lock().await;
                queue.select(self.config.batch_size, Utc::now(), &attempted)
            };
            if selected.is_empty() {
                break;
            }
            attempted.extend(selected.iter().map(|item| item.id));

            for batch in group_batches(selected) {
                if self.stop.swap(false, Ordering::SeqCst) {
                    tracing::info!("Sync cycle stopped on request");
                    report.stopped = true;
                    break 'rounds;
                }
                let outcome = self.run_batch(&batch, started, &mut report).await;
                attempted.extend(outcome.requeue.iter().map(|item| item.id));
                self.settle(&batch, outcome).await;
            }
        }

        tracing::info!(
            "Sync cycle finished: {} batch(es), {} completed, {} failed, {} rejected",
            report.batches,
            report.completed,
            report.failed,
            report.rejected
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        batch: &Batch,
        cycle_started: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> BatchOutcome {
        let ids = batch.ids();
        report.batches += 1;
        self.queue.lock().await.begin(&ids);

        let data_type = match self.check_batch(batch) {
            Ok(data_type) => data_type,
            Err(e) => {
                tracing::warn!("Rejecting {} batch of {}: {}", batch.store_name, ids.len(), e);
                report.rejected += ids.len();
                return BatchOutcome {
                    reject: ids,
                    reject_error: e.to_string(),
                    ..BatchOutcome::default()
                };
            }
        };

        let records: Vec<Record> = batch.items.iter().map(|i| i.payload.clone()).collect();
        match self
            .transport
            .upload_batch(data_type, batch.operation, &records)
            .await
        {
            Ok(()) => {
                tracing::debug!("Uploaded {} {} item(s)", ids.len(), batch.store_name);
                report.completed += ids.len();
                if self.has_live_items(&batch.store_name, &ids).await {
                    tracing::debug!("Checkpoint for {} held: items still queued", data_type);
                } else if let Err(e) =
                    self.engine.advance_checkpoint(data_type, cycle_started).await
                {
                    tracing::warn!("Checkpoint for {} not saved: {}", data_type, e);
                }
                BatchOutcome {
                    evict: ids,
                    ..BatchOutcome::default()
                }
            }
            Err(TransportError::Stale { record_ids }) => {
                let message = TransportError::Stale {
                    record_ids: record_ids.clone(),
                }
                .to_string();
                let mut outcome = BatchOutcome::default();
                for item in &batch.items {
                    let listed = item
                        .record_id()
                        .is_some_and(|id| record_ids.contains(&id));
                    let handed = if listed {
                        self.hand_off(data_type, item, report).await
                    } else {
                        HandOff::Fail(message.clone())
                    };
                    match handed {
                        HandOff::Evict(requeue) => {
                            outcome.evict.push(item.id);
                            if let Some(record) = requeue {
                                outcome.requeue.push(SyncItem::new(
                                    Operation::Update,
                                    item.store_name.clone(),
                                    record,
                                    item.priority,
                                    Utc::now(),
                                ));
                            }
                        }
                        HandOff::Fail(error) => {
                            report.failed += 1;
                            outcome.fail.push((item.id, error));
                        }
                    }
                }
                outcome
            }
            Err(e) => {
                tracing::warn!("Upload of {} {} item(s) failed: {}", ids.len(), batch.store_name, e);
                report.failed += ids.len();
                let error = e.to_string();
                BatchOutcome {
                    fail: ids.into_iter().map(|id| (id, error.clone())).collect(),
                    ..BatchOutcome::default()
                }
            }
        }
    }

    /// Whether items of a store other than `settled` are still waiting to
    /// upload. A checkpoint must not pass an edit that has not synced.
    async fn has_live_items(&self, store_name: &str, settled: &[ItemId]) -> bool {
        let queue = self.queue.lock().await;
        let live = queue.iter().any(|item| {
            item.store_name == store_name
                && !settled.contains(&item.id)
                && !queue.is_exhausted(item)
        });
        live
    }

    fn check_batch(&self, batch: &Batch) -> Result<DataType, ValidationError> {
        let data_type = DataType::from_store_name(&batch.store_name)?;
        for item in &batch.items {
            validate_record(data_type, batch.operation, &item.payload)?;
        }
        Ok(data_type)
    }

    /// Settle one record the remote refused as stale.
    async fn hand_off(
        &self,
        data_type: DataType,
        item: &SyncItem,
        report: &mut CycleReport,
    ) -> HandOff {
        let Some(record_id) = item.record_id() else {
            return HandOff::Fail("record has no id".into());
        };
        let remote = match self.transport.read_remote(data_type, &record_id).await {
            Ok(Some(remote)) => remote,
            Ok(None) => return HandOff::Fail("stale, but remote record is gone".into()),
            Err(e) => return HandOff::Fail(e.to_string()),
        };
        let local = &item.payload;

        // A refused delete yields to the remote edit. A refused write is an
        // unsynced local edit, so any field difference is a conflict.
        let conflict = if item.operation == Operation::Delete {
            None
        } else {
            self.engine.detect_unsynced(local, &remote, data_type)
        };
        if let Some(conflict) = conflict {
            return match self.engine.handle(conflict).await {
                Ok(Handled::Resolved(resolved)) => {
                    report.conflicts_resolved += 1;
                    let upload = resolved.upload;
                    HandOff::Evict(upload.then_some(resolved.result.resolved_record))
                }
                Ok(Handled::Manual(_)) => {
                    report.conflicts_deferred += 1;
                    HandOff::Evict(None)
                }
                Err(e) => HandOff::Fail(e.to_string()),
            };
        }

        match self.store.put(data_type, &remote).await {
            Ok(()) => {
                tracing::info!("Took remote version of {}/{}", data_type, record_id);
                report.remote_applied += 1;
                HandOff::Evict(None)
            }
            Err(e) => HandOff::Fail(e.to_string()),
        }
    }

    /// Persist a batch outcome, then mirror each durable write in memory.
    ///
    /// A failed write is logged and its item keeps the version storage
    /// holds, so a later cycle picks it up again.
    async fn settle(&self, batch: &Batch, outcome: BatchOutcome) {
        let now = Utc::now();
        let mut queue = self.queue.lock().await;

        let mut updated = {
            let mut next = queue.clone();
            let mut updated = next.reject(&outcome.reject, &outcome.reject_error, now);
            for (id, error) in &outcome.fail {
                updated.extend(next.fail(&[*id], error, now));
            }
            updated
        };
        updated.extend(outcome.requeue);

        let mut unsaved: Vec<ItemId> = Vec::new();
        if !outcome.evict.is_empty() {
            match self.store.remove_items(&outcome.evict).await {
                Ok(()) => {
                    queue.complete(&outcome.evict);
                }
                Err(e) => {
                    tracing::error!(
                        "{} uploaded item(s) not removed from storage: {}",
                        outcome.evict.len(),
                        e
                    );
                    unsaved.extend(outcome.evict.iter().copied());
                }
            }
        }
        for item in updated {
            match self.store.save_item(&item).await {
                Ok(()) => {
                    queue.remove(&[item.id]);
                    queue.push(item);
                }
                Err(e) => {
                    tracing::error!("Queue item {} not saved: {}", item.id, e);
                    unsaved.push(item.id);
                }
            }
        }

        for original in batch.items.iter().filter(|i| unsaved.contains(&i.id)) {
            queue.remove(&[original.id]);
            queue.push(original.clone());
        }
    }

    /// Reset failed items with retries left to pending, then run a cycle.
    pub async fn retry_failed_items(&self) -> Result<CycleReport, QueueError> {
        let reset = self.queue.lock().await.reset_failed();
        for item in &reset {
            self.store.save_item(item).await?;
        }
        tracing::info!("Reset {} failed item(s) for retry", reset.len());

        let mut report = self.run_cycle(false).await?;
        report.retried = reset.len();
        Ok(report)
    }

    /// Permanently evict items that ran out of attempts and return them.
    pub async fn cleanup_failed_items(&self) -> Result<Vec<SyncItem>, QueueError> {
        let evicted = self.queue.lock().await.evict_exhausted();
        let ids: Vec<ItemId> = evicted.iter().map(|item| item.id).collect();
        if !ids.is_empty() {
            self.store.remove_items(&ids).await?;
            tracing::info!("Evicted {} exhausted item(s)", ids.len());
        }
        Ok(evicted)
    }

    /// Apply a manual decision and queue the resolved record for upload if
    /// it differs from the remote.
    pub async fn resolve_manual(
        &self,
        conflict_id: ConflictId,
        decision: ManualDecision,
    ) -> Result<Resolved, QueueError> {
        let resolved = self.engine.submit_decision(conflict_id, decision).await?;
        if resolved.upload {
            let item = SyncItem::new(
                Operation::Update,
                resolved.data_type.store_name(),
                resolved.result.resolved_record.clone(),
                Priority::Normal,
                Utc::now(),
            );
            self.store.save_item(&item).await?;
            self.queue.lock().await.push(item);
        }
        Ok(resolved)
    }

    /// Report connectivity changes. Coming back online schedules a cycle
    /// after a short random delay.
    pub fn set_online(&self, online: bool) {
        let event = if online {
            Event::WentOnline
        } else {
            Event::WentOffline
        };
        let actions = self.on_event(event);
        self.dispatch(actions);
    }

    /// The application returned to the foreground.
    pub fn foregrounded(&self) {
        let actions = self.on_event(Event::Foregrounded);
        self.dispatch(actions);
    }

    /// The periodic timer fired.
    pub fn interval_elapsed(&self) {
        let actions = self.on_event(Event::IntervalElapsed);
        self.dispatch(actions);
    }

    /// Best-effort flush before shutdown. Runs a cycle only when idle and
    /// items are queued.
    pub async fn shutdown(&self) -> Result<Option<CycleReport>, QueueError> {
        let queued = self.queue.lock().await.pending().len();
        let actions = self.on_event(Event::ShutdownRequested { queued });
        if actions.contains(&Action::FlushBeforeShutdown) {
            tracing::info!("Flushing {} item(s) before shutdown", queued);
            return Ok(Some(self.run_cycle(false).await?));
        }
        Ok(None)
    }

    /// Ask a running cycle to stop at the next batch boundary.
    ///
    /// Returns `false` when no cycle is running.
    pub fn stop_cycle(&self) -> bool {
        if !self.lock_state().is_syncing() {
            return false;
        }
        self.stop.store(true, Ordering::SeqCst);
        true
    }

    /// Items waiting for or inside a cycle.
    pub async fn pending_items(&self) -> Vec<SyncItem> {
        self.queue.lock().await.pending().into_iter().cloned().collect()
    }

    /// Failed items that will be retried.
    pub async fn failed_items(&self) -> Vec<SyncItem> {
        self.queue.lock().await.failed().into_iter().cloned().collect()
    }

    /// Items out of attempts, awaiting cleanup.
    pub async fn exhausted_items(&self) -> Vec<SyncItem> {
        self.queue.lock().await.exhausted().into_iter().cloned().collect()
    }

    /// Counts per state and priority.
    pub async fn stats(&self) -> QueueStats {
        self.queue.lock().await.stats()
    }
}

//! Background scheduler task.
//!
//! Runs the periodic timer and turns [`Trigger`]s into calls on the
//! [`SyncQueue`]. The queue's own cycle requests (reconnect, high-priority
//! enqueue, timer) come back through the same channel.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::queue::SyncQueue;
use crate::store::Storage;
use crate::transport::RemoteTransport;

/// Capacity of the trigger channel. Requests beyond it are dropped.
pub const TRIGGER_CAPACITY: usize = 32;

/// Something that should make the queue act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Run a cycle now.
    RunCycle {
        /// Bypass the running-cycle guard.
        force: bool,
    },
    /// Run a cycle after a delay.
    RunCycleAfter(Duration),
    /// Connectivity came back.
    Online,
    /// Connectivity was lost.
    Offline,
    /// The application returned to the foreground.
    Foreground,
    /// Flush and stop the task.
    Shutdown,
}

/// Handle to a running scheduler task.
pub struct SchedulerHandle {
    triggers: mpsc::Sender<Trigger>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Send a trigger to the task.
    pub async fn send(&self, trigger: Trigger) -> bool {
        self.triggers.send(trigger).await.is_ok()
    }

    /// Flush pending items and wait for the task to stop.
    pub async fn shutdown(self) {
        let _ = self.triggers.send(Trigger::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::error!("Scheduler task ended abnormally: {}", e);
        }
    }

    /// Stop the task without flushing.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawn the scheduler for a queue.
///
/// Returns `None` if a scheduler was already spawned for this queue.
pub fn spawn_scheduler<S, T>(queue: Arc<SyncQueue<S, T>>) -> Option<SchedulerHandle>
where
    S: Storage + 'static,
    T: RemoteTransport + 'static,
{
    let mut rx = queue.take_trigger_receiver()?;
    let triggers = queue.trigger_sender();
    let delayed = triggers.clone();
    let period = queue.config().sync_interval();

    let task = tokio::spawn(async move {
        tracing::info!("Scheduler started (interval: {}ms)", period.as_millis());
        let mut timer = interval(period);
        // The first tick completes immediately.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => queue.interval_elapsed(),
                trigger = rx.recv() => {
                    let Some(trigger) = trigger else { break };
                    match trigger {
                        Trigger::RunCycle { force } => run(&queue, force).await,
                        Trigger::RunCycleAfter(delay) => {
                            let tx = delayed.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = tx.send(Trigger::RunCycle { force: false }).await;
                            });
                        }
                        Trigger::Online => queue.set_online(true),
                        Trigger::Offline => queue.set_online(false),
                        Trigger::Foreground => queue.foregrounded(),
                        Trigger::Shutdown => {
                            if let Err(e) = queue.shutdown().await {
                                tracing::error!("Flush before shutdown failed: {}", e);
                            }
                            break;
                        }
                    }
                }
            }
        }
        tracing::info!("Scheduler stopped");
    });

    Some(SchedulerHandle { triggers, task })
}

async fn run<S: Storage, T: RemoteTransport>(queue: &SyncQueue<S, T>, force: bool) {
    match queue.run_cycle(force).await {
        Ok(report) if report.skipped.is_some() => {
            tracing::debug!("Scheduled cycle skipped: {:?}", report.skipped);
        }
        Ok(report) => {
            tracing::debug!("Scheduled cycle completed {} item(s)", report.completed);
        }
        Err(e) => tracing::error!("Scheduled cycle failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::store::MemoryStore;
    use crate::transport::MockTransport;
    use resync_types::{DataType, Operation, Priority};
    use serde_json::json;

    fn queue(interval_ms: u64) -> (Arc<SyncQueue<MemoryStore, MockTransport>>, MockTransport) {
        let transport = MockTransport::new();
        let config = SyncConfig {
            sync_interval_ms: interval_ms,
            ..SyncConfig::default()
        };
        let queue = SyncQueue::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(transport.clone()),
        );
        (Arc::new(queue), transport)
    }

    #[tokio::test]
    async fn only_one_scheduler_per_queue() {
        let (queue, _) = queue(60_000);
        let handle = spawn_scheduler(Arc::clone(&queue)).unwrap();
        assert!(spawn_scheduler(Arc::clone(&queue)).is_none());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_uploads_queued_items() {
        let (queue, transport) = queue(1_000);
        queue
            .enqueue(
                Operation::Create,
                "tasks",
                json!({"id": "t1", "title": "Ship"}),
                Priority::Normal,
            )
            .await
            .unwrap();

        let handle = spawn_scheduler(Arc::clone(&queue)).unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(transport.remote_count(DataType::Tasks), 1);
        assert!(queue.pending_items().await.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn high_priority_enqueue_triggers_a_cycle() {
        let (queue, transport) = queue(600_000);
        let handle = spawn_scheduler(Arc::clone(&queue)).unwrap();

        queue
            .enqueue(
                Operation::Create,
                "contacts",
                json!({"id": "c1", "name": "Ada"}),
                Priority::High,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(transport.remote_count(DataType::Contacts), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_the_queue() {
        let (queue, transport) = queue(600_000);
        let handle = spawn_scheduler(Arc::clone(&queue)).unwrap();
        queue
            .enqueue(
                Operation::Create,
                "events",
                json!({"id": "e1", "title": "Launch"}),
                Priority::Low,
            )
            .await
            .unwrap();

        handle.shutdown().await;
        assert_eq!(transport.remote_count(DataType::Events), 1);
    }
}

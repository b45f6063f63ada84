//! In-memory bookkeeping for the sync queue.
//!
//! [`PendingQueue`] holds every live [`SyncItem`] in upload order (priority,
//! then creation time) and applies the status transitions of a sync cycle:
//!
//! 1. `select()` - pick eligible items, skipping ones already tried this cycle
//! 2. `begin()` - mark them `syncing`
//! 3. `complete()` / `fail()` / `reject()` - apply the batch outcome
//!
//! Nothing here touches storage. Every mutating call returns the items it
//! changed so the caller can persist exactly those.

use chrono::{DateTime, Duration, Utc};
use resync_types::{ItemId, ItemStatus, Operation, Priority, SyncItem};
use std::collections::{BTreeMap, HashSet};

use crate::backoff::retry_delay;

/// Counts over the live queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Waiting for a cycle.
    pub pending: usize,
    /// In a batch right now.
    pub syncing: usize,
    /// Failed with retries left.
    pub failed: usize,
    /// Out of retries, waiting for cleanup.
    pub exhausted: usize,
    /// Live items per priority.
    pub by_priority: BTreeMap<Priority, usize>,
}

/// Items sharing a store and an operation, uploaded with one transport call.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Target store.
    pub store_name: String,
    /// Shared operation.
    pub operation: Operation,
    /// Items in upload order.
    pub items: Vec<SyncItem>,
}

impl Batch {
    /// Ids of the items in this batch.
    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id).collect()
    }
}

/// Group items by `(store, operation)`, in order of first appearance.
pub fn group_batches(items: Vec<SyncItem>) -> Vec<Batch> {
    let mut batches: Vec<Batch> = Vec::new();
    for item in items {
        match batches
            .iter_mut()
            .find(|b| b.store_name == item.store_name && b.operation == item.operation)
        {
            Some(batch) => batch.items.push(item),
            None => batches.push(Batch {
                store_name: item.store_name.clone(),
                operation: item.operation,
                items: vec![item],
            }),
        }
    }
    batches
}

fn order_key(item: &SyncItem) -> (Priority, DateTime<Utc>, ItemId) {
    (item.priority, item.created_at, item.id)
}

/// Priority-ordered queue of live sync items.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    items: Vec<SyncItem>,
    max_attempts: u32,
}

impl PendingQueue {
    /// Create an empty queue. Items are retried until `max_attempts`.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            items: Vec::new(),
            max_attempts,
        }
    }

    /// Rebuild a queue from durable storage.
    ///
    /// Completed items are dropped and interrupted `syncing` items go back to
    /// `pending`.
    pub fn from_items(items: impl IntoIterator<Item = SyncItem>, max_attempts: u32) -> Self {
        let mut items: Vec<SyncItem> = items
            .into_iter()
            .filter(|item| item.status != ItemStatus::Completed)
            .map(|mut item| {
                if item.status == ItemStatus::Syncing {
                    item.status = ItemStatus::Pending;
                }
                item
            })
            .collect();
        items.sort_by_key(order_key);
        Self {
            items,
            max_attempts,
        }
    }

    /// Attempts after which an item is terminal.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Insert an item at its place in upload order.
    pub fn push(&mut self, item: SyncItem) {
        let key = order_key(&item);
        let at = self.items.partition_point(|other| order_key(other) <= key);
        self.items.insert(at, item);
    }

    /// Look up an item.
    pub fn get(&self, id: &ItemId) -> Option<&SyncItem> {
        self.items.iter().find(|item| item.id == *id)
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the queue holds no live items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All live items in upload order.
    pub fn iter(&self) -> impl Iterator<Item = &SyncItem> {
        self.items.iter()
    }

    /// Whether an item has used up its attempts.
    pub fn is_exhausted(&self, item: &SyncItem) -> bool {
        item.attempts >= self.max_attempts
    }

    /// Whether an item may be uploaded at `now`.
    ///
    /// Failed items wait out their retry delay first.
    pub fn is_eligible(&self, item: &SyncItem, now: DateTime<Utc>) -> bool {
        if self.is_exhausted(item) {
            return false;
        }
        match item.status {
            ItemStatus::Pending => true,
            ItemStatus::Failed => match item.last_attempt {
                Some(at) => {
                    let delay = Duration::from_std(retry_delay(item.attempts))
                        .unwrap_or_else(|_| Duration::zero());
                    now >= at + delay
                }
                None => true,
            },
            ItemStatus::Syncing | ItemStatus::Completed => false,
        }
    }

    /// Up to `limit` eligible items in upload order, skipping `exclude`.
    pub fn select(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        exclude: &HashSet<ItemId>,
    ) -> Vec<SyncItem> {
        self.items
            .iter()
            .filter(|item| !exclude.contains(&item.id) && self.is_eligible(item, now))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Mark items as part of a running batch.
    pub fn begin(&mut self, ids: &[ItemId]) {
        for item in self.items.iter_mut().filter(|i| ids.contains(&i.id)) {
            item.status = ItemStatus::Syncing;
        }
    }

    /// Batch succeeded: evict the items and return them as completed.
    pub fn complete(&mut self, ids: &[ItemId]) -> Vec<SyncItem> {
        let mut done = self.remove(ids);
        for item in &mut done {
            item.status = ItemStatus::Completed;
        }
        done
    }

    /// Batch failed: bump attempts and record the error.
    pub fn fail(&mut self, ids: &[ItemId], error: &str, now: DateTime<Utc>) -> Vec<SyncItem> {
        self.update(ids, |item| {
            item.attempts = item.attempts.saturating_add(1);
            item.status = ItemStatus::Failed;
            item.last_attempt = Some(now);
            item.last_error = Some(error.to_string());
        })
    }

    /// Batch can never succeed: exhaust the items' attempts at once.
    pub fn reject(&mut self, ids: &[ItemId], error: &str, now: DateTime<Utc>) -> Vec<SyncItem> {
        let max = self.max_attempts;
        self.update(ids, |item| {
            item.attempts = item.attempts.max(max);
            item.status = ItemStatus::Failed;
            item.last_attempt = Some(now);
            item.last_error = Some(error.to_string());
        })
    }

    /// Evict items regardless of state.
    pub fn remove(&mut self, ids: &[ItemId]) -> Vec<SyncItem> {
        let mut removed = Vec::new();
        self.items.retain(|item| {
            if ids.contains(&item.id) {
                removed.push(item.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Put failed items with retries left back to `pending`.
    pub fn reset_failed(&mut self) -> Vec<SyncItem> {
        let max = self.max_attempts;
        let ids: Vec<ItemId> = self
            .items
            .iter()
            .filter(|item| item.status == ItemStatus::Failed && item.attempts < max)
            .map(|item| item.id)
            .collect();
        self.update(&ids, |item| item.status = ItemStatus::Pending)
    }

    /// Evict every item that ran out of attempts.
    pub fn evict_exhausted(&mut self) -> Vec<SyncItem> {
        let ids: Vec<ItemId> = self
            .items
            .iter()
            .filter(|item| self.is_exhausted(item))
            .map(|item| item.id)
            .collect();
        self.remove(&ids)
    }

    /// Items waiting for or inside a cycle.
    pub fn pending(&self) -> Vec<&SyncItem> {
        self.items
            .iter()
            .filter(|item| {
                matches!(item.status, ItemStatus::Pending | ItemStatus::Syncing)
                    && !self.is_exhausted(item)
            })
            .collect()
    }

    /// Failed items that will be retried.
    pub fn failed(&self) -> Vec<&SyncItem> {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Failed && !self.is_exhausted(item))
            .collect()
    }

    /// Items out of attempts.
    pub fn exhausted(&self) -> Vec<&SyncItem> {
        self.items
            .iter()
            .filter(|item| self.is_exhausted(item))
            .collect()
    }

    /// Counts per state and priority.
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for item in &self.items {
            *stats.by_priority.entry(item.priority).or_insert(0) += 1;
            if self.is_exhausted(item) {
                stats.exhausted += 1;
                continue;
            }
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::Syncing => stats.syncing += 1,
                ItemStatus::Failed => stats.failed += 1,
                ItemStatus::Completed => {}
            }
        }
        stats
    }

    fn update(&mut self, ids: &[ItemId], mut f: impl FnMut(&mut SyncItem)) -> Vec<SyncItem> {
        let mut changed = Vec::new();
        for item in self.items.iter_mut().filter(|i| ids.contains(&i.id)) {
            f(item);
            changed.push(item.clone());
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use resync_types::Record;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()
    }

    fn item(store: &str, op: Operation, priority: Priority, secs: i64) -> SyncItem {
        let payload = Record::from_value(json!({"id": format!("r{secs}"), "title": "x"})).unwrap();
        SyncItem::new(op, store, payload, priority, t0() + Duration::seconds(secs))
    }

    fn ids(items: &[SyncItem]) -> Vec<ItemId> {
        items.iter().map(|i| i.id).collect()
    }

    #[test]
    fn orders_by_priority_then_age() {
        let mut queue = PendingQueue::new(3);
        let low = item("tasks", Operation::Create, Priority::Low, 0);
        let normal = item("tasks", Operation::Create, Priority::Normal, 2);
        let old_normal = item("tasks", Operation::Create, Priority::Normal, 1);
        let high = item("tasks", Operation::Create, Priority::High, 3);

        for i in [low.clone(), normal.clone(), old_normal.clone(), high.clone()] {
            queue.push(i);
        }

        let order: Vec<ItemId> = queue.iter().map(|i| i.id).collect();
        assert_eq!(order, vec![high.id, old_normal.id, normal.id, low.id]);
    }

    #[test]
    fn reload_drops_completed_and_resets_syncing() {
        let mut done = item("tasks", Operation::Create, Priority::Normal, 0);
        done.status = ItemStatus::Completed;
        let mut interrupted = item("tasks", Operation::Update, Priority::Low, 1);
        interrupted.status = ItemStatus::Syncing;
        let high = item("events", Operation::Create, Priority::High, 2);

        let queue = PendingQueue::from_items(vec![done, interrupted.clone(), high.clone()], 3);

        assert_eq!(queue.len(), 2);
        let order: Vec<ItemId> = queue.iter().map(|i| i.id).collect();
        assert_eq!(order, vec![high.id, interrupted.id]);
        assert_eq!(
            queue.get(&interrupted.id).unwrap().status,
            ItemStatus::Pending
        );
    }

    #[test]
    fn select_respects_limit_and_exclusions() {
        let mut queue = PendingQueue::new(3);
        let items: Vec<SyncItem> = (0..5)
            .map(|s| item("tasks", Operation::Create, Priority::Normal, s))
            .collect();
        for i in &items {
            queue.push(i.clone());
        }

        let first = queue.select(3, t0(), &HashSet::new());
        assert_eq!(ids(&first), ids(&items[..3]));

        let seen: HashSet<ItemId> = ids(&first).into_iter().collect();
        let rest = queue.select(3, t0(), &seen);
        assert_eq!(ids(&rest), ids(&items[3..]));
    }

    #[test]
    fn failure_increments_attempts_and_waits_for_backoff() {
        let mut queue = PendingQueue::new(3);
        let i = item("tasks", Operation::Create, Priority::Normal, 0);
        queue.push(i.clone());

        queue.begin(&[i.id]);
        assert_eq!(queue.stats().syncing, 1);
        assert_eq!(queue.pending().len(), 1);

        let changed = queue.fail(&[i.id], "timeout", t0());
        assert_eq!(changed[0].attempts, 1);
        assert_eq!(changed[0].last_error.as_deref(), Some("timeout"));

        let stored = queue.get(&i.id).unwrap();
        assert!(!queue.is_eligible(stored, t0() + Duration::seconds(1)));
        assert!(queue.is_eligible(stored, t0() + Duration::seconds(2)));
    }

    #[test]
    fn attempts_never_decrease() {
        let mut queue = PendingQueue::new(3);
        let i = item("tasks", Operation::Create, Priority::Normal, 0);
        queue.push(i.clone());

        let mut last = 0;
        for _ in 0..5 {
            queue.fail(&[i.id], "boom", t0());
            queue.reset_failed();
            let attempts = queue.get(&i.id).unwrap().attempts;
            assert!(attempts >= last);
            last = attempts;
        }
        assert_eq!(last, 5);
        assert!(queue.pending().is_empty());
        assert!(queue.failed().is_empty());
        assert_eq!(queue.exhausted().len(), 1);
    }

    #[test]
    fn reject_exhausts_immediately() {
        let mut queue = PendingQueue::new(3);
        let i = item("nope", Operation::Create, Priority::Normal, 0);
        queue.push(i.clone());

        let changed = queue.reject(&[i.id], "unknown store: nope", t0());
        assert_eq!(changed[0].attempts, 3);
        assert_eq!(changed[0].status, ItemStatus::Failed);
        assert!(queue.select(10, t0() + Duration::hours(1), &HashSet::new()).is_empty());
        assert!(queue.reset_failed().is_empty());

        let evicted = queue.evict_exhausted();
        assert_eq!(ids(&evicted), vec![i.id]);
        assert!(queue.is_empty());
    }

    #[test]
    fn reset_failed_skips_backoff() {
        let mut queue = PendingQueue::new(3);
        let i = item("tasks", Operation::Create, Priority::Normal, 0);
        queue.push(i.clone());
        queue.fail(&[i.id], "timeout", t0());

        let reset = queue.reset_failed();
        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].status, ItemStatus::Pending);
        assert_eq!(reset[0].attempts, 1);
        assert_eq!(queue.select(10, t0(), &HashSet::new()).len(), 1);
    }

    #[test]
    fn complete_evicts() {
        let mut queue = PendingQueue::new(3);
        let i = item("tasks", Operation::Create, Priority::Normal, 0);
        queue.push(i.clone());

        let done = queue.complete(&[i.id]);
        assert_eq!(done[0].status, ItemStatus::Completed);
        assert!(queue.is_empty());
    }

    #[test]
    fn stats_count_by_state_and_priority() {
        let mut queue = PendingQueue::new(2);
        let a = item("tasks", Operation::Create, Priority::High, 0);
        let b = item("tasks", Operation::Create, Priority::Normal, 1);
        let c = item("tasks", Operation::Create, Priority::Normal, 2);
        for i in [a.clone(), b.clone(), c.clone()] {
            queue.push(i);
        }
        queue.fail(&[b.id], "x", t0());
        queue.reject(&[c.id], "y", t0());

        let stats = queue.stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.by_priority.get(&Priority::Normal), Some(&2));
        assert_eq!(stats.by_priority.get(&Priority::High), Some(&1));
    }

    #[test]
    fn batches_group_by_store_and_operation() {
        let items = vec![
            item("tasks", Operation::Create, Priority::High, 0),
            item("events", Operation::Create, Priority::High, 1),
            item("tasks", Operation::Create, Priority::Normal, 2),
            item("tasks", Operation::Delete, Priority::Normal, 3),
        ];
        let batches = group_batches(items);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].store_name, "tasks");
        assert_eq!(batches[0].operation, Operation::Create);
        assert_eq!(batches[0].items.len(), 2);
        assert_eq!(batches[1].store_name, "events");
        assert_eq!(batches[2].operation, Operation::Delete);
    }
}

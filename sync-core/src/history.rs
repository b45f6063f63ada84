//! Bounded in-memory histories of resolved conflicts, backups and audit
//! entries. The oldest entry is evicted first.

use resync_types::{AuditEntry, Backup, Conflict, ConflictId};
use std::collections::VecDeque;

/// Append-only log that keeps at most `capacity` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    /// Create an empty log.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append an entry. Returns the entry evicted to make room, if any.
    pub fn push(&mut self, entry: T) -> Option<T> {
        self.entries.push_back(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Maximum number of entries kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Up to `n` entries, newest first.
    pub fn latest(&self, n: usize) -> Vec<&T> {
        self.entries.iter().rev().take(n).collect()
    }

    /// Replace the first entry matching `pred`, or append.
    pub fn upsert(&mut self, entry: T, pred: impl Fn(&T) -> bool) -> Option<T> {
        match self.entries.iter_mut().find(|e| pred(e)) {
            Some(slot) => {
                *slot = entry;
                None
            }
            None => self.push(entry),
        }
    }
}

/// Conflict, backup and audit histories.
///
/// Unresolved conflicts are never evicted; only resolved ones count against
/// the conflict bound.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    /// Conflicts still waiting for a resolution.
    pub open: Vec<Conflict>,
    /// Resolved conflicts, oldest first.
    pub resolved: BoundedLog<Conflict>,
    /// Pre-resolution snapshots.
    pub backups: BoundedLog<Backup>,
    /// Detection and resolution outcomes.
    pub audit: BoundedLog<AuditEntry>,
}

impl History {
    /// Create empty histories with the given bounds.
    pub fn new(max_conflicts: usize, max_backups: usize, max_audit_entries: usize) -> Self {
        Self {
            open: Vec::new(),
            resolved: BoundedLog::new(max_conflicts),
            backups: BoundedLog::new(max_backups),
            audit: BoundedLog::new(max_audit_entries),
        }
    }

    /// Store a conflict snapshot, replacing any older one with the same id.
    pub fn record_conflict(&mut self, conflict: Conflict) {
        let id = conflict.id;
        if conflict.is_resolved() {
            self.open.retain(|c| c.id != id);
            self.resolved.upsert(conflict, |c| c.id == id);
        } else {
            match self.open.iter_mut().find(|c| c.id == id) {
                Some(slot) => *slot = conflict,
                None => self.open.push(conflict),
            }
        }
    }

    /// Look up a conflict, open or resolved.
    pub fn conflict(&self, id: &ConflictId) -> Option<&Conflict> {
        self.open
            .iter()
            .chain(self.resolved.iter())
            .find(|c| c.id == *id)
    }

    /// All retained conflicts: open ones first, then resolved, oldest first.
    pub fn conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.open.iter().chain(self.resolved.iter())
    }
}

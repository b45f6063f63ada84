//! ConflictEngine - detection, resolution and manual decisions.
//!
//! The engine applies the pure strategies from `resync-core` and performs
//! the side effects around them:
//!
//! ```text
//! Conflict → plan_automatic ──Some──→ put resolved record → backups → audit
//!                 │                                                  → checkpoint
//!                 └──None──→ requires_manual → pending_manual()
//!                                              submit_decision() ──→ same path
//! ```
//!
//! A conflict id is never processed twice at once: an in-flight set guards
//! every resolution, and a resolved conflict is terminal.

use chrono::{DateTime, Utc};
use resync_core::{
    apply_decision, detect_conflicts, diff_fields, last_modified_wins,
    plan_automatic, AutoResolvePolicy, Checkpoints, DecisionError, Outcome,
};
use resync_types::{
    AuditEntry, AuditId, AuditKind, Backup, BackupId, Conflict, ConflictId, ConflictStatus,
    DataType, ManualDecision, ManualRequest, Record, ResolutionMethod, ResolutionResult, Side,
    Strategy,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::SyncConfig;
use crate::store::{Storage, StorageError};
use crate::transport::{RemoteTransport, TransportError};

/// Conflict engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Local storage failed; the conflict stays unresolved.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The remote could not be read.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A manual decision was refused.
    #[error("invalid decision: {0}")]
    Decision(#[from] DecisionError),

    /// No conflict with this id is known.
    #[error("conflict not found: {0}")]
    NotFound(ConflictId),

    /// The conflict is being resolved by another task.
    #[error("conflict {0} is already being resolved")]
    InFlight(ConflictId),

    /// Local or remote changed since the conflict was captured. The snapshot
    /// has been refreshed; review it and decide again.
    #[error("conflict {0} is stale and was refreshed")]
    Stale(ConflictId),
}

/// A finished resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// The conflict that was resolved.
    pub conflict_id: ConflictId,
    /// Store the record belongs to.
    pub data_type: DataType,
    /// The stored result.
    pub result: ResolutionResult,
    /// Whether the resolved record differs from the remote and must be
    /// uploaded.
    pub upload: bool,
}

/// What [`ConflictEngine::handle`] did with a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    /// Resolved automatically.
    Resolved(Resolved),
    /// Waiting for a manual decision.
    Manual(ConflictId),
}

/// Removes a conflict id from the in-flight set when dropped.
struct InFlightGuard<'a> {
    set: &'a StdMutex<HashSet<ConflictId>>,
    id: ConflictId,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a StdMutex<HashSet<ConflictId>>, id: ConflictId) -> Option<Self> {
        let mut ids = set.lock().unwrap_or_else(|e| e.into_inner());
        if ids.insert(id) {
            Some(Self { set, id })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut ids = self.set.lock().unwrap_or_else(|e| e.into_inner());
        ids.remove(&self.id);
    }
}

/// Detects conflicts, resolves them, and keeps their history.
pub struct ConflictEngine<S: Storage, T: RemoteTransport> {
    store: Arc<S>,
    transport: Arc<T>,
    policy: AutoResolvePolicy,
    checkpoints: Mutex<Checkpoints>,
    manual: Mutex<HashMap<ConflictId, Conflict>>,
    in_flight: StdMutex<HashSet<ConflictId>>,
}

impl<S: Storage, T: RemoteTransport> ConflictEngine<S, T> {
    /// Create an engine. Call [`load`](Self::load) to restore persisted state.
    pub fn new(store: Arc<S>, transport: Arc<T>, config: &SyncConfig) -> Self {
        Self {
            store,
            transport,
            policy: config.policy(),
            checkpoints: Mutex::new(Checkpoints::new()),
            manual: Mutex::new(HashMap::new()),
            in_flight: StdMutex::new(HashSet::new()),
        }
    }

    /// Restore checkpoints and conflicts waiting for a decision.
    pub async fn load(&self) -> Result<(), EngineError> {
        let stored = self.store.load_checkpoints().await?;
        {
            let mut checkpoints = self.checkpoints.lock().await;
            for (data_type, at) in stored {
                checkpoints.advance(data_type, at);
            }
        }

        let open: HashMap<ConflictId, Conflict> = self
            .store
            .load_conflicts()
            .await?
            .into_iter()
            .filter(|c| c.status == ConflictStatus::RequiresManual)
            .map(|c| (c.id, c))
            .collect();
        tracing::debug!("Restored {} conflict(s) awaiting a decision", open.len());
        *self.manual.lock().await = open;
        Ok(())
    }

    /// Current sync checkpoints.
    pub async fn checkpoints(&self) -> Checkpoints {
        self.checkpoints.lock().await.clone()
    }

    /// Move a data type's checkpoint forward and persist it.
    ///
    /// Returns `true` if the checkpoint moved.
    pub async fn advance_checkpoint(
        &self,
        data_type: DataType,
        at: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let moved = self.checkpoints.lock().await.advance(data_type, at);
        if moved {
            self.store.save_checkpoint(data_type, at).await?;
            tracing::debug!("Checkpoint for {} advanced to {}", data_type, at);
        }
        Ok(moved)
    }

    /// Compare two versions of a record against the current checkpoint.
    pub async fn detect(
        &self,
        local: Option<&Record>,
        remote: Option<&Record>,
        data_type: DataType,
    ) -> Option<Conflict> {
        let checkpoints = self.checkpoints.lock().await;
        detect_conflicts(local, remote, data_type, &checkpoints, Utc::now())
    }

    /// Compare a queued local edit with the remote version that refused it.
    ///
    /// The queued edit has never reached the remote and the remote holds a
    /// version the edit did not see, so both sides count as changed whatever
    /// the checkpoint says. `None` means no comparable field differs.
    pub fn detect_unsynced(
        &self,
        local: &Record,
        remote: &Record,
        data_type: DataType,
    ) -> Option<Conflict> {
        detect_conflicts(
            Some(local),
            Some(remote),
            data_type,
            &Checkpoints::new(),
            Utc::now(),
        )
    }

    /// Resolve a detected conflict automatically or route it to manual
    /// resolution.
    pub async fn handle(&self, conflict: Conflict) -> Result<Handled, EngineError> {
        if let Some(result) = conflict.resolution.clone() {
            return Ok(Handled::Resolved(self.resolved(&conflict, result)));
        }
        let _guard = InFlightGuard::acquire(&self.in_flight, conflict.id)
            .ok_or(EngineError::InFlight(conflict.id))?;
        let started = Instant::now();

        tracing::info!(
            "Conflict {} on {}/{}: {} field(s), priority {}",
            conflict.id,
            conflict.data_type,
            conflict.record_id,
            conflict.field_conflicts.len(),
            conflict.priority
        );
        self.audit(&conflict, AuditKind::Detected, None, None, started, None)
            .await;

        match plan_automatic(&conflict, &self.policy, Utc::now()) {
            Some(outcome) => {
                let resolved = self
                    .apply(conflict, outcome, ResolutionMethod::Automatic, started)
                    .await?;
                Ok(Handled::Resolved(resolved))
            }
            None => {
                let mut conflict = conflict;
                conflict.status = ConflictStatus::RequiresManual;
                self.store.save_conflict(&conflict).await?;
                self.audit(&conflict, AuditKind::Deferred, None, None, started, None)
                    .await;
                tracing::info!("Conflict {} requires a manual decision", conflict.id);

                let id = conflict.id;
                self.manual.lock().await.insert(id, conflict);
                Ok(Handled::Manual(id))
            }
        }
    }

    /// Conflicts waiting for a decision, oldest first.
    pub async fn pending_manual(&self) -> Vec<ManualRequest> {
        let manual = self.manual.lock().await;
        let mut open: Vec<&Conflict> = manual.values().collect();
        open.sort_by_key(|c| (c.detected_at, c.id));
        open.into_iter().map(ManualRequest::from).collect()
    }

    /// Apply an external decision to a conflict.
    ///
    /// Both sides are re-read first. If either changed since the conflict was
    /// captured and the fresh pair still differs, the snapshot is refreshed
    /// and [`EngineError::Stale`] is returned. If the fresh pair agrees, it is
    /// settled by last-modified-wins instead of the decision.
    ///
    /// Deciding an already resolved conflict returns the stored result.
    pub async fn submit_decision(
        &self,
        id: ConflictId,
        decision: ManualDecision,
    ) -> Result<Resolved, EngineError> {
        let _guard =
            InFlightGuard::acquire(&self.in_flight, id).ok_or(EngineError::InFlight(id))?;
        let started = Instant::now();

        let cached = self.manual.lock().await.get(&id).cloned();
        let conflict = match cached {
            Some(conflict) => conflict,
            None => self
                .store
                .load_conflict(&id)
                .await?
                .ok_or(EngineError::NotFound(id))?,
        };
        if let Some(result) = conflict.resolution.clone() {
            return Ok(self.resolved(&conflict, result));
        }

        let local = self
            .store
            .get(conflict.data_type, &conflict.record_id)
            .await?;
        let remote = self
            .transport
            .read_remote(conflict.data_type, &conflict.record_id)
            .await?;

        let outcome = match (local, remote) {
            (Some(local), Some(remote))
                if local != conflict.local_record || remote != conflict.remote_record =>
            {
                let field_conflicts = diff_fields(conflict.data_type, &local, &remote);
                if field_conflicts.is_empty() {
                    let mut fresh = conflict.clone();
                    fresh.local_record = local;
                    fresh.remote_record = remote;
                    fresh.field_conflicts = field_conflicts;
                    let outcome = last_modified_wins(&fresh);
                    let resolved = self
                        .apply(fresh, outcome, ResolutionMethod::Automatic, started)
                        .await?;
                    self.manual.lock().await.remove(&id);
                    return Ok(resolved);
                }

                let Some(mut fresh) = detect_conflicts(
                    Some(&local),
                    Some(&remote),
                    conflict.data_type,
                    &Checkpoints::new(),
                    conflict.detected_at,
                ) else {
                    return Err(EngineError::Stale(id));
                };
                fresh.id = id;
                fresh.status = ConflictStatus::RequiresManual;
                self.store.save_conflict(&fresh).await?;
                self.manual.lock().await.insert(id, fresh);
                tracing::warn!("Conflict {} changed underneath the decision", id);
                return Err(EngineError::Stale(id));
            }
            _ => apply_decision(&conflict, &decision, Utc::now())?,
        };

        let resolved = self
            .apply(conflict, outcome, ResolutionMethod::Manual, started)
            .await?;
        self.manual.lock().await.remove(&id);
        Ok(resolved)
    }

    /// One conflict, open or resolved.
    pub async fn conflict(&self, id: &ConflictId) -> Result<Option<Conflict>, EngineError> {
        if let Some(conflict) = self.manual.lock().await.get(id) {
            return Ok(Some(conflict.clone()));
        }
        Ok(self.store.load_conflict(id).await?)
    }

    /// Backups taken for a conflict.
    pub async fn backups(&self, id: &ConflictId) -> Result<Vec<Backup>, EngineError> {
        Ok(self.store.load_backups(id).await?)
    }

    /// Up to `limit` audit entries, newest first.
    pub async fn audit_log(&self, limit: usize) -> Result<Vec<AuditEntry>, EngineError> {
        Ok(self.store.load_audit(limit).await?)
    }

    async fn apply(
        &self,
        mut conflict: Conflict,
        outcome: Outcome,
        method: ResolutionMethod,
        started: Instant,
    ) -> Result<Resolved, EngineError> {
        let now = Utc::now();
        let data_type = conflict.data_type;
        let stored = self.store.get(data_type, &conflict.record_id).await?;

        let mut backups = Vec::new();
        if stored.as_ref() == Some(&outcome.record) {
            tracing::debug!("Conflict {} resolved to the stored record", conflict.id);
        } else {
            if let Err(e) = self.store.put(data_type, &outcome.record).await {
                tracing::error!("Writing resolution of {} failed: {}", conflict.id, e);
                self.audit(
                    &conflict,
                    AuditKind::Failed,
                    Some(outcome.strategy),
                    outcome.winner,
                    started,
                    Some(e.to_string()),
                )
                .await;
                return Err(e.into());
            }

            let losers = match outcome.winner {
                Some(winner) => vec![winner.opposite()],
                None => vec![Side::Local, Side::Remote],
            };
            for side in losers {
                let backup = Backup {
                    id: BackupId::new(),
                    conflict_id: conflict.id,
                    data_type,
                    record_id: conflict.record_id.clone(),
                    side,
                    reason: format!("{} resolution", outcome.strategy),
                    record: conflict.record(side).clone(),
                    created_at: now,
                };
                self.store.save_backup(&backup).await?;
                backups.push(backup);
            }
        }

        let result = ResolutionResult {
            strategy: outcome.strategy,
            resolved_record: outcome.record,
            method,
            winner: outcome.winner,
            backups,
            timestamp: now,
        };
        conflict.status = ConflictStatus::Resolved;
        conflict.resolved_at = Some(now);
        conflict.resolution = Some(result.clone());
        self.store.save_conflict(&conflict).await?;

        self.audit(
            &conflict,
            AuditKind::Resolved,
            Some(result.strategy),
            result.winner,
            started,
            None,
        )
        .await;
        tracing::info!(
            "Conflict {} resolved by {} ({:?})",
            conflict.id,
            result.strategy,
            method
        );

        let seen = [
            conflict.local_record.timestamp(),
            conflict.remote_record.timestamp(),
        ];
        if let Some(at) = seen.into_iter().flatten().max() {
            self.advance_checkpoint(data_type, at).await?;
        }

        Ok(self.resolved(&conflict, result))
    }

    fn resolved(&self, conflict: &Conflict, result: ResolutionResult) -> Resolved {
        let upload = !diff_fields(
            conflict.data_type,
            &result.resolved_record,
            &conflict.remote_record,
        )
        .is_empty();
        Resolved {
            conflict_id: conflict.id,
            data_type: conflict.data_type,
            result,
            upload,
        }
    }

    async fn audit(
        &self,
        conflict: &Conflict,
        kind: AuditKind,
        strategy: Option<Strategy>,
        winner: Option<Side>,
        started: Instant,
        detail: Option<String>,
    ) {
        let entry = AuditEntry {
            id: AuditId::new(),
            conflict_id: conflict.id,
            data_type: conflict.data_type,
            record_id: conflict.record_id.clone(),
            kind,
            strategy,
            winner,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            at: Utc::now(),
            detail,
        };
        if let Err(e) = self.store.append_audit(&entry).await {
            tracing::warn!("Audit entry for {} not recorded: {}", conflict.id, e);
        }
    }
}

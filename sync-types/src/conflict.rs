//! Conflict model: detected divergence, its resolution, and the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{AuditId, BackupId, ConflictId, DataType, Record};

/// How much a differing field matters. Declaration order is severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Derived or timestamp fields.
    Low,
    /// Categorical or secondary fields.
    Medium,
    /// Identity-like fields.
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// One side of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The version mutated on this device.
    Local,
    /// The version held by the authoritative remote store.
    Remote,
}

impl Side {
    /// The other side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Local,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// One differing field within a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    /// Field name.
    pub field: String,
    /// Local value (`null` when absent).
    pub local_value: Value,
    /// Remote value (`null` when absent).
    pub remote_value: Value,
    /// Severity from the classification table.
    pub severity: Severity,
    /// Whether the field has defined merge semantics for these two values.
    pub can_merge: bool,
}

/// Strategy suggested at detection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SuggestedResolution {
    /// No high-severity field differs: the newer side wins.
    LastModifiedWins {
        /// The side with the later timestamp.
        winner: Side,
    },
    /// Every differing field is mergeable.
    Merge,
    /// A human has to decide.
    Manual,
}

/// Lifecycle of a conflict: `Pending → {Resolved | RequiresManual}` and
/// `RequiresManual → Resolved`. `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// Detected, not processed yet.
    Pending,
    /// Resolved; never reprocessed.
    Resolved,
    /// Waiting for an external decision.
    RequiresManual,
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::RequiresManual => "requires_manual",
        };
        f.write_str(s)
    }
}

/// The algorithm that produced a resolved record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Whole record from the newer side.
    LastModifiedWins,
    /// Field-level merge on top of the local record.
    Merge,
    /// Each field decided independently.
    FieldByField,
    /// Whole record from the side with clearly better data quality.
    ConfidenceBased,
    /// Externally supplied decision.
    Manual,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LastModifiedWins => "last_modified_wins",
            Self::Merge => "merge",
            Self::FieldByField => "field_by_field",
            Self::ConfidenceBased => "confidence_based",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Whether a resolution was decided by policy or by a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Decided by the strategy engine.
    Automatic,
    /// Decided through the manual-resolution contract.
    Manual,
}

/// Immutable snapshot of a record taken right before a resolution replaced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    /// Unique identifier for this snapshot.
    pub id: BackupId,
    /// Conflict whose resolution triggered the snapshot.
    pub conflict_id: ConflictId,
    /// Store the record belongs to.
    pub data_type: DataType,
    /// Logical record id.
    pub record_id: String,
    /// Which version was captured.
    pub side: Side,
    /// Why the snapshot was taken.
    pub reason: String,
    /// The captured record.
    pub record: Record,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    /// Strategy that produced the record.
    pub strategy: Strategy,
    /// The record written locally.
    pub resolved_record: Record,
    /// Policy or person.
    pub method: ResolutionMethod,
    /// Winning side, for whole-record strategies.
    pub winner: Option<Side>,
    /// Snapshots of the replaced versions.
    pub backups: Vec<Backup>,
    /// When the resolution was applied.
    pub timestamp: DateTime<Utc>,
}

/// Detected divergence between the local and remote versions of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique identifier for this conflict.
    pub id: ConflictId,
    /// Store the record belongs to.
    pub data_type: DataType,
    /// Logical record id.
    pub record_id: String,
    /// Local version at detection time.
    pub local_record: Record,
    /// Remote version at detection time.
    pub remote_record: Record,
    /// Differing fields.
    pub field_conflicts: Vec<FieldConflict>,
    /// Highest field severity.
    pub priority: Severity,
    /// Lifecycle state.
    pub status: ConflictStatus,
    /// Strategy suggested at detection time.
    pub suggested_resolution: SuggestedResolution,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
    /// When the conflict was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// The applied resolution.
    pub resolution: Option<ResolutionResult>,
}

impl Conflict {
    /// Whether the conflict reached its terminal state.
    pub fn is_resolved(&self) -> bool {
        self.status == ConflictStatus::Resolved
    }

    /// Look up a differing field.
    pub fn field(&self, name: &str) -> Option<&FieldConflict> {
        self.field_conflicts.iter().find(|fc| fc.field == name)
    }

    /// The record version on the given side.
    pub fn record(&self, side: Side) -> &Record {
        match side {
            Side::Local => &self.local_record,
            Side::Remote => &self.remote_record,
        }
    }
}

/// What the manual-resolution collaborator is shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualRequest {
    /// The conflict awaiting a decision.
    pub conflict_id: ConflictId,
    /// Store the record belongs to.
    pub data_type: DataType,
    /// Logical record id.
    pub record_id: String,
    /// Local version.
    pub local_record: Record,
    /// Remote version.
    pub remote_record: Record,
    /// Differing fields.
    pub field_conflicts: Vec<FieldConflict>,
    /// Strategy suggested at detection time.
    pub suggested_resolution: SuggestedResolution,
}

impl From<&Conflict> for ManualRequest {
    fn from(conflict: &Conflict) -> Self {
        Self {
            conflict_id: conflict.id,
            data_type: conflict.data_type,
            record_id: conflict.record_id.clone(),
            local_record: conflict.local_record.clone(),
            remote_record: conflict.remote_record.clone(),
            field_conflicts: conflict.field_conflicts.clone(),
            suggested_resolution: conflict.suggested_resolution,
        }
    }
}

/// The only response shapes the manual-resolution contract accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "values", rename_all = "snake_case")]
pub enum ManualDecision {
    /// Keep the local record as-is.
    KeepLocal,
    /// Take the remote record.
    KeepRemote,
    /// Apply the merge strategy.
    Merge,
    /// Explicit per-field values applied on top of the local record.
    Fields(Map<String, Value>),
}

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A conflict was detected.
    Detected,
    /// A conflict was resolved.
    Resolved,
    /// A conflict was routed to manual resolution.
    Deferred,
    /// Applying a resolution failed.
    Failed,
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Detected => "detected",
            Self::Resolved => "resolved",
            Self::Deferred => "deferred",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One line of the detection/resolution audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier for this entry.
    pub id: AuditId,
    /// The conflict concerned.
    pub conflict_id: ConflictId,
    /// Store the record belongs to.
    pub data_type: DataType,
    /// Logical record id.
    pub record_id: String,
    /// What happened.
    pub kind: AuditKind,
    /// Strategy applied, if any.
    pub strategy: Option<Strategy>,
    /// Winning side, if any.
    pub winner: Option<Side>,
    /// Time spent, in milliseconds.
    pub duration_ms: u64,
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Free-form detail (error message, field count, ...).
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn severity_orders_low_to_high() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(
            [Severity::Low, Severity::High, Severity::Medium]
                .into_iter()
                .max(),
            Some(Severity::High)
        );
    }

    #[test]
    fn manual_decision_json_shape() {
        let keep: ManualDecision = serde_json::from_value(json!({"decision": "keep_remote"})).unwrap();
        assert_eq!(keep, ManualDecision::KeepRemote);

        let fields: ManualDecision = serde_json::from_value(json!({
            "decision": "fields",
            "values": {"name": "Jon"}
        }))
        .unwrap();
        match fields {
            ManualDecision::Fields(values) => assert_eq!(values["name"], "Jon"),
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn unknown_decision_shape_is_rejected() {
        let parsed = serde_json::from_value::<ManualDecision>(json!({"decision": "flip_a_coin"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn suggested_resolution_tags_strategy() {
        let s = SuggestedResolution::LastModifiedWins {
            winner: Side::Remote,
        };
        assert_eq!(
            serde_json::to_value(s).unwrap(),
            json!({"strategy": "last_modified_wins", "winner": "remote"})
        );
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Local.opposite(), Side::Remote);
        assert_eq!(Side::Remote.opposite(), Side::Local);
    }
}

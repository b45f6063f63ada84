//! Conflict detection.
//!
//! Decides whether two versions of a logical record genuinely conflict, at
//! field granularity. A conflict exists only when *both* sides changed after
//! the data type's last sync checkpoint and at least one comparable field
//! differs under type-aware equality.

use chrono::{DateTime, Utc};
use resync_types::{
    Conflict, ConflictId, ConflictStatus, DataType, FieldConflict, Record, Severity,
    SuggestedResolution,
};
use serde_json::Value;

use crate::checkpoint::Checkpoints;
use crate::compare::values_equal;
use crate::merge::can_merge;
use crate::schema::fields;
use crate::strategy::newer_side;

/// Which sides changed since the last checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divergence {
    /// Neither side changed.
    Unchanged,
    /// Only the local record changed; it can overwrite the remote.
    LocalOnly,
    /// Only the remote record changed; it can overwrite the local.
    RemoteOnly,
    /// Both changed: field-level comparison needed.
    Both,
}

/// Classify how a pair of records moved relative to the checkpoint.
pub fn divergence(
    local: &Record,
    remote: &Record,
    data_type: DataType,
    checkpoints: &Checkpoints,
) -> Divergence {
    match (
        checkpoints.changed_since(data_type, local),
        checkpoints.changed_since(data_type, remote),
    ) {
        (true, true) => Divergence::Both,
        (true, false) => Divergence::LocalOnly,
        (false, true) => Divergence::RemoteOnly,
        (false, false) => Divergence::Unchanged,
    }
}

/// Field-level diff over the data type's comparable fields.
pub fn diff_fields(data_type: DataType, local: &Record, remote: &Record) -> Vec<FieldConflict> {
    fields(data_type)
        .iter()
        .filter(|spec| spec.comparable)
        .filter_map(|spec| {
            let l = local.get(spec.name).unwrap_or(&Value::Null);
            let r = remote.get(spec.name).unwrap_or(&Value::Null);
            if values_equal(spec.kind, l, r) {
                return None;
            }
            Some(FieldConflict {
                field: spec.name.to_string(),
                local_value: l.clone(),
                remote_value: r.clone(),
                severity: spec.severity,
                can_merge: can_merge(spec.merge, l, r),
            })
        })
        .collect()
}

/// Suggest a strategy for a non-empty diff.
///
/// - no high-severity field: last-modified-wins
/// - every field mergeable: merge
/// - a single unmergeable field: last-modified-wins, recency settles it
/// - otherwise: manual
pub fn suggest(
    field_conflicts: &[FieldConflict],
    local: &Record,
    remote: &Record,
) -> SuggestedResolution {
    let has_high = field_conflicts
        .iter()
        .any(|fc| fc.severity == Severity::High);
    let all_mergeable = field_conflicts.iter().all(|fc| fc.can_merge);

    if !has_high {
        SuggestedResolution::LastModifiedWins {
            winner: newer_side(local, remote),
        }
    } else if all_mergeable {
        SuggestedResolution::Merge
    } else if field_conflicts.len() == 1 {
        SuggestedResolution::LastModifiedWins {
            winner: newer_side(local, remote),
        }
    } else {
        SuggestedResolution::Manual
    }
}

/// Compare two versions of a record and build a [`Conflict`] when they
/// genuinely diverge.
///
/// Returns `None` when either side is absent (a create or delete, handled
/// elsewhere), when only one side changed since the checkpoint, or when no
/// comparable field differs.
pub fn detect_conflicts(
    local: Option<&Record>,
    remote: Option<&Record>,
    data_type: DataType,
    checkpoints: &Checkpoints,
    now: DateTime<Utc>,
) -> Option<Conflict> {
    let (local, remote) = (local?, remote?);

    if divergence(local, remote, data_type, checkpoints) != Divergence::Both {
        return None;
    }

    let field_conflicts = diff_fields(data_type, local, remote);
    let priority = field_conflicts.iter().map(|fc| fc.severity).max()?;
    let suggested_resolution = suggest(&field_conflicts, local, remote);

    Some(Conflict {
        id: ConflictId::new(),
        data_type,
        record_id: local.id().or_else(|| remote.id()).unwrap_or_default(),
        local_record: local.clone(),
        remote_record: remote.clone(),
        field_conflicts,
        priority,
        status: ConflictStatus::Pending,
        suggested_resolution,
        detected_at: now,
        resolved_at: None,
        resolution: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use resync_types::Side;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap()
    }

    fn at(offset_secs: i64) -> String {
        (t0() + Duration::seconds(offset_secs)).to_rfc3339()
    }

    fn synced_at(offset_secs: i64, dt: DataType) -> Checkpoints {
        let mut checkpoints = Checkpoints::new();
        checkpoints.advance(dt, t0() + Duration::seconds(offset_secs));
        checkpoints
    }

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn absent_side_is_not_a_conflict() {
        let local = record(json!({"id": "c1", "name": "Ada", "updatedAt": at(0)}));
        let cp = synced_at(-1, DataType::Contacts);
        assert!(detect_conflicts(Some(&local), None, DataType::Contacts, &cp, t0()).is_none());
        assert!(detect_conflicts(None, Some(&local), DataType::Contacts, &cp, t0()).is_none());
    }

    #[test]
    fn one_sided_change_is_not_a_conflict() {
        let local = record(json!({"id": "c1", "name": "John", "updatedAt": at(10)}));
        let remote = record(json!({"id": "c1", "name": "Jon", "updatedAt": at(-5)}));
        let cp = synced_at(0, DataType::Contacts);

        assert_eq!(
            divergence(&local, &remote, DataType::Contacts, &cp),
            Divergence::LocalOnly
        );
        assert!(detect_conflicts(Some(&local), Some(&remote), DataType::Contacts, &cp, t0())
            .is_none());
    }

    #[test]
    fn scenario_a_name_divergence() {
        let local = record(json!({"id": "c1", "name": "John", "updatedAt": at(0)}));
        let remote = record(json!({"id": "c1", "name": "Jon", "updatedAt": at(1)}));
        let cp = synced_at(-1, DataType::Contacts);

        let conflict =
            detect_conflicts(Some(&local), Some(&remote), DataType::Contacts, &cp, t0()).unwrap();

        assert_eq!(conflict.field_conflicts.len(), 1);
        let fc = &conflict.field_conflicts[0];
        assert_eq!(fc.field, "name");
        assert_eq!(fc.severity, Severity::High);
        assert!(!fc.can_merge);
        assert_eq!(conflict.priority, Severity::High);
        assert_eq!(
            conflict.suggested_resolution,
            SuggestedResolution::LastModifiedWins {
                winner: Side::Remote
            }
        );
        assert_eq!(conflict.status, ConflictStatus::Pending);
        assert_eq!(conflict.record_id, "c1");
    }

    #[test]
    fn normalized_equal_fields_do_not_conflict() {
        let local = record(json!({"id": "e1", "title": "Team  Lunch", "updatedAt": at(5)}));
        let remote = record(json!({"id": "e1", "title": "team lunch", "updatedAt": at(6)}));
        let cp = synced_at(0, DataType::Events);
        assert!(
            detect_conflicts(Some(&local), Some(&remote), DataType::Events, &cp, t0()).is_none()
        );
    }

    #[test]
    fn medium_only_diff_suggests_last_modified_wins() {
        let local = record(json!({
            "id": "e1", "title": "Picnic", "description": "Bring chairs.", "updatedAt": at(5)
        }));
        let remote = record(json!({
            "id": "e1", "title": "Picnic", "description": "Bring tables.", "updatedAt": at(6)
        }));
        let cp = synced_at(0, DataType::Events);

        let conflict =
            detect_conflicts(Some(&local), Some(&remote), DataType::Events, &cp, t0()).unwrap();
        let fc = conflict.field("description").unwrap();
        assert!(fc.can_merge);
        assert_eq!(fc.severity, Severity::Medium);
        // Medium only: last-modified-wins is suggested, merge stays available.
        assert_eq!(
            conflict.suggested_resolution,
            SuggestedResolution::LastModifiedWins {
                winner: Side::Remote
            }
        );
    }

    #[test]
    fn several_unmergeable_high_fields_need_manual() {
        let local = record(json!({
            "id": "c1", "name": "Ada", "email": "ada@a.io", "updatedAt": at(5)
        }));
        let remote = record(json!({
            "id": "c1", "name": "Grace", "email": "grace@b.io", "updatedAt": at(6)
        }));
        let cp = synced_at(0, DataType::Contacts);

        let conflict =
            detect_conflicts(Some(&local), Some(&remote), DataType::Contacts, &cp, t0()).unwrap();
        assert_eq!(conflict.suggested_resolution, SuggestedResolution::Manual);
        assert_eq!(conflict.priority, Severity::High);
    }

    #[test]
    fn synonym_statuses_can_merge() {
        let local = record(json!({"id": "t1", "title": "Ship", "status": "finished", "updatedAt": at(5)}));
        let remote = record(json!({"id": "t1", "title": "Ship", "status": "Completed", "updatedAt": at(6)}));
        let cp = synced_at(0, DataType::Tasks);

        let conflict =
            detect_conflicts(Some(&local), Some(&remote), DataType::Tasks, &cp, t0()).unwrap();
        assert!(conflict.field("status").unwrap().can_merge);
    }

    #[test]
    fn unrelated_statuses_cannot_merge() {
        let fcs = diff_fields(
            DataType::Tasks,
            &record(json!({"status": "done"})),
            &record(json!({"status": "open"})),
        );
        assert_eq!(fcs.len(), 1);
        assert!(!fcs[0].can_merge);
    }

    #[test]
    fn timestamps_are_not_diffed() {
        let fcs = diff_fields(
            DataType::Tasks,
            &record(json!({"id": "t1", "updatedAt": at(1)})),
            &record(json!({"id": "t1", "updatedAt": at(2)})),
        );
        assert!(fcs.is_empty());
    }

    #[test]
    fn high_and_mergeable_suggests_merge() {
        let fcs = vec![FieldConflict {
            field: "notes".into(),
            local_value: json!("A."),
            remote_value: json!("B."),
            severity: Severity::High,
            can_merge: true,
        }];
        let r = record(json!({}));
        assert_eq!(suggest(&fcs, &r, &r), SuggestedResolution::Merge);
    }
}

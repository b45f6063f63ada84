//! Resolution strategies.
//!
//! Each strategy turns a [`Conflict`] into one resolved record. Strategies
//! never write anything; the caller takes the [`Outcome`] and applies it.

use chrono::{DateTime, Duration, Utc};
use resync_types::{
    Conflict, DataType, ManualDecision, Record, Severity, Side, Strategy, SuggestedResolution,
    ID_FIELD,
};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::detect::diff_fields;
use crate::merge::merge_values;
use crate::quality::{confidence, prefer_by_quality};
use crate::schema::{classify, field_spec};

/// Minimum confidence gap for one whole record to win outright.
pub const CONFIDENCE_MARGIN: f64 = 0.2;

/// Which conflicts may be resolved without a person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoResolvePolicy {
    /// Master switch.
    pub auto_resolve: bool,
    /// Whether high-priority conflicts may be resolved automatically.
    pub auto_resolve_high_priority: bool,
    /// Per data type overrides; absent types are enabled.
    pub by_type: BTreeMap<DataType, bool>,
}

impl Default for AutoResolvePolicy {
    fn default() -> Self {
        Self {
            auto_resolve: true,
            auto_resolve_high_priority: false,
            by_type: BTreeMap::new(),
        }
    }
}

/// Whether policy allows resolving this conflict automatically.
pub fn can_auto_resolve(conflict: &Conflict, policy: &AutoResolvePolicy) -> bool {
    if !policy.auto_resolve {
        return false;
    }
    if conflict.priority == Severity::High && !policy.auto_resolve_high_priority {
        return false;
    }
    policy
        .by_type
        .get(&conflict.data_type)
        .copied()
        .unwrap_or(true)
}

/// A resolved record and how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Strategy that produced the record.
    pub strategy: Strategy,
    /// The record to write locally.
    pub record: Record,
    /// Winning side for whole-record outcomes; `None` when fields were mixed.
    pub winner: Option<Side>,
}

/// Side with the later timestamp.
///
/// Ties go to the remote, as does a pair where neither side carries a
/// timestamp. A side with a timestamp beats one without.
pub fn newer_side(local: &Record, remote: &Record) -> Side {
    match (local.timestamp(), remote.timestamp()) {
        (Some(l), Some(r)) if l > r => Side::Local,
        (Some(_), None) => Side::Local,
        _ => Side::Remote,
    }
}

/// Whole record from the side with the later timestamp.
pub fn last_modified_wins(conflict: &Conflict) -> Outcome {
    let winner = newer_side(&conflict.local_record, &conflict.remote_record);
    Outcome {
        strategy: Strategy::LastModifiedWins,
        record: conflict.record(winner).clone(),
        winner: Some(winner),
    }
}

fn put_field(record: &mut Record, field: &str, value: &Value) {
    if value.is_null() {
        record.remove(field);
    } else {
        record.set(field, value.clone());
    }
}

fn side_value(side: Side, local: &Value, remote: &Value) -> Value {
    match side {
        Side::Local => local.clone(),
        Side::Remote => remote.clone(),
    }
}

/// Local record with every mergeable field merged and every other differing
/// field taken from the newer side. Stamped `updatedAt = now`.
pub fn merge(conflict: &Conflict, now: DateTime<Utc>) -> Outcome {
    let newer = newer_side(&conflict.local_record, &conflict.remote_record);
    let mut record = conflict.local_record.clone();

    for fc in &conflict.field_conflicts {
        let rule = classify(conflict.data_type, &fc.field).merge;
        let value = match merge_values(rule, &fc.local_value, &fc.remote_value) {
            Some(merged) if fc.can_merge => merged,
            _ => side_value(newer, &fc.local_value, &fc.remote_value),
        };
        put_field(&mut record, &fc.field, &value);
    }

    record.touch(now);
    Outcome {
        strategy: Strategy::Merge,
        record,
        winner: None,
    }
}

/// Decide each field on its own: merge, then data quality, then recency for
/// low-severity fields only.
///
/// Returns `None` as soon as one field cannot be decided.
pub fn field_by_field(conflict: &Conflict, now: DateTime<Utc>) -> Option<Outcome> {
    let newer = newer_side(&conflict.local_record, &conflict.remote_record);
    let mut record = conflict.local_record.clone();

    for fc in &conflict.field_conflicts {
        let (l, r) = (&fc.local_value, &fc.remote_value);
        let rule = classify(conflict.data_type, &fc.field).merge;

        let merged = if fc.can_merge {
            merge_values(rule, l, r)
        } else {
            None
        };
        let value = match merged {
            Some(value) => value,
            None => {
                let by_quality = field_spec(conflict.data_type, &fc.field)
                    .and_then(|spec| prefer_by_quality(spec, l, r, now));
                match by_quality {
                    Some(side) => side_value(side, l, r),
                    None if fc.severity == Severity::Low => side_value(newer, l, r),
                    None => return None,
                }
            }
        };
        put_field(&mut record, &fc.field, &value);
    }

    record.touch(now);
    Some(Outcome {
        strategy: Strategy::FieldByField,
        record,
        winner: None,
    })
}

/// Whole record from the side with clearly higher data-quality confidence.
///
/// Declines when the gap is below [`CONFIDENCE_MARGIN`].
pub fn confidence_based(conflict: &Conflict, now: DateTime<Utc>) -> Option<Outcome> {
    let local = confidence(conflict.data_type, &conflict.local_record, now);
    let remote = confidence(conflict.data_type, &conflict.remote_record, now);

    let winner = if local - remote >= CONFIDENCE_MARGIN {
        Side::Local
    } else if remote - local >= CONFIDENCE_MARGIN {
        Side::Remote
    } else {
        return None;
    };

    Some(Outcome {
        strategy: Strategy::ConfidenceBased,
        record: conflict.record(winner).clone(),
        winner: Some(winner),
    })
}

/// Resolve a conflict without a person, if policy and the strategies allow.
///
/// `None` means the conflict needs a manual decision. The suggested strategy
/// is applied directly; a manual suggestion first tries field-by-field and
/// then confidence-based resolution.
pub fn plan_automatic(
    conflict: &Conflict,
    policy: &AutoResolvePolicy,
    now: DateTime<Utc>,
) -> Option<Outcome> {
    if !can_auto_resolve(conflict, policy) {
        return None;
    }

    let mut outcome = match conflict.suggested_resolution {
        SuggestedResolution::LastModifiedWins { .. } => last_modified_wins(conflict),
        SuggestedResolution::Merge => merge(conflict, now),
        SuggestedResolution::Manual => {
            field_by_field(conflict, now).or_else(|| confidence_based(conflict, now))?
        }
    };
    supersede_remote(&mut outcome.record, conflict, now);
    Some(outcome)
}

/// Why a manual decision was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionError {
    /// The value map names a field the data type does not have.
    #[error("unknown field `{0}`")]
    UnknownField(String),

    /// The value map tries to change the record id.
    #[error("record id cannot be changed")]
    IdChanged,
}

/// Apply an externally supplied decision verbatim.
pub fn apply_decision(
    conflict: &Conflict,
    decision: &ManualDecision,
    now: DateTime<Utc>,
) -> Result<Outcome, DecisionError> {
    let (mut record, winner) = match decision {
        ManualDecision::KeepLocal => (conflict.local_record.clone(), Some(Side::Local)),
        ManualDecision::KeepRemote => (conflict.remote_record.clone(), Some(Side::Remote)),
        ManualDecision::Merge => (merge(conflict, now).record, None),
        ManualDecision::Fields(values) => {
            let mut record = conflict.local_record.clone();
            for (field, value) in values {
                if field_spec(conflict.data_type, field).is_none() {
                    return Err(DecisionError::UnknownField(field.clone()));
                }
                if field == ID_FIELD && record.get(ID_FIELD) != Some(value) {
                    return Err(DecisionError::IdChanged);
                }
                record.set(field, value.clone());
            }
            record.touch(now);
            (record, None)
        }
    };

    supersede_remote(&mut record, conflict, now);
    Ok(Outcome {
        strategy: Strategy::Manual,
        record,
        winner,
    })
}

/// Make sure a resolved record that differs from the remote also carries a
/// later timestamp than it, or the next upload would be rejected as stale.
pub fn supersede_remote(record: &mut Record, conflict: &Conflict, now: DateTime<Utc>) {
    let remote = &conflict.remote_record;
    if diff_fields(conflict.data_type, record, remote).is_empty() {
        return;
    }
    match (record.timestamp(), remote.timestamp()) {
        (Some(ours), Some(theirs)) if ours > theirs => {}
        (_, Some(theirs)) => record.touch(now.max(theirs + Duration::milliseconds(1))),
        (_, None) => {
            if record.timestamp().is_none() {
                record.touch(now);
            }
        }
    }
}

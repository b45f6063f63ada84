//! Declarative field tables, keyed by data type.
//!
//! Every classification decision (severity, mergeability, confidence weight,
//! required-ness) comes from the static tables below. Lookups are pure:
//! the same `(data type, field)` always yields the same answer.

use resync_types::{parse_instant, DataType, Operation, Record, Severity, ValidationError};
use serde_json::Value;

use crate::quality::is_empty;

/// How a field's values are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// The logical record id.
    Identity,
    /// Short human-entered text (names, titles).
    Text,
    /// Longer free text made of sentences.
    FreeText,
    /// One value out of a known vocabulary.
    Categorical,
    /// An email address.
    Email,
    /// A phone number.
    Phone,
    /// A calendar date or instant entered by a user.
    Date,
    /// A machine-maintained instant.
    Timestamp,
    /// A number.
    Number,
}

/// Groups of interchangeable categorical values. The first member of each
/// group is the canonical spelling.
pub type SynonymGroups = &'static [&'static [&'static str]];

/// Defined merge semantics for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Values cannot be merged.
    None,
    /// Free text: union of unique sentences, local first.
    SentenceUnion,
    /// Categorical: canonical member of the shared synonym group.
    Synonyms(SynonymGroups),
}

/// One row of a data type's field table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    /// Field name.
    pub name: &'static str,
    /// Value interpretation.
    pub kind: FieldKind,
    /// Severity when the field differs.
    pub severity: Severity,
    /// Merge semantics.
    pub merge: MergeRule,
    /// Weight in the confidence score.
    pub weight: f64,
    /// Whether upload validation requires a non-empty value.
    pub required: bool,
    /// Whether the detector diffs this field.
    pub comparable: bool,
}

/// Result of classifying a `(data type, field)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Severity when the field differs.
    pub severity: Severity,
    /// Merge semantics.
    pub merge: MergeRule,
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    severity: Severity,
    merge: MergeRule,
    weight: f64,
) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        severity,
        merge,
        weight,
        required: false,
        comparable: true,
    }
}

const fn required(spec: FieldSpec) -> FieldSpec {
    FieldSpec {
        required: true,
        ..spec
    }
}

// updatedAt/createdAt change on every edit; they drive detection instead of
// being diffed.
const fn bookkeeping(spec: FieldSpec) -> FieldSpec {
    FieldSpec {
        comparable: false,
        ..spec
    }
}

const RELATIONSHIP: SynonymGroups = &[
    &["friend", "buddy", "pal"],
    &["family", "relative", "relatives"],
    &["colleague", "coworker", "co-worker"],
    &["client", "customer"],
];

const EVENT_CATEGORY: SynonymGroups = &[
    &["meeting", "meetup", "sync"],
    &["party", "celebration", "gathering"],
    &["appointment", "booking", "reservation"],
];

const EVENT_STATUS: SynonymGroups = &[
    &["confirmed", "scheduled", "booked"],
    &["cancelled", "canceled", "called off"],
    &["tentative", "maybe", "pending"],
];

const TASK_PRIORITY: SynonymGroups = &[
    &["high", "urgent", "important"],
    &["medium", "normal"],
    &["low", "minor", "someday"],
];

const TASK_STATUS: SynonymGroups = &[
    &["done", "completed", "complete", "finished"],
    &["in_progress", "in progress", "started", "doing"],
    &["todo", "to do", "open", "not started"],
];

use FieldKind::*;
use MergeRule::{SentenceUnion, Synonyms};
use Severity::{High, Low, Medium};

static CONTACTS: &[FieldSpec] = &[
    required(field("id", Identity, High, MergeRule::None, 1.0)),
    required(field("name", Text, High, MergeRule::None, 0.9)),
    field("email", Email, High, MergeRule::None, 0.8),
    field("phone", Phone, Medium, MergeRule::None, 0.5),
    field("relationship", Categorical, Medium, Synonyms(RELATIONSHIP), 0.3),
    field("notes", FreeText, Medium, SentenceUnion, 0.4),
    field("lastContacted", Timestamp, Low, MergeRule::None, 0.1),
    bookkeeping(field("createdAt", Timestamp, Low, MergeRule::None, 0.1)),
    bookkeeping(field("updatedAt", Timestamp, Low, MergeRule::None, 0.1)),
];

static EVENTS: &[FieldSpec] = &[
    required(field("id", Identity, High, MergeRule::None, 1.0)),
    required(field("title", Text, High, MergeRule::None, 0.9)),
    field("date", Date, High, MergeRule::None, 0.8),
    field("location", Text, Medium, MergeRule::None, 0.5),
    field("category", Categorical, Medium, Synonyms(EVENT_CATEGORY), 0.3),
    field("status", Categorical, Medium, Synonyms(EVENT_STATUS), 0.3),
    field("description", FreeText, Medium, SentenceUnion, 0.4),
    field("attendeeCount", Number, Low, MergeRule::None, 0.1),
    bookkeeping(field("createdAt", Timestamp, Low, MergeRule::None, 0.1)),
    bookkeeping(field("updatedAt", Timestamp, Low, MergeRule::None, 0.1)),
];

static TASKS: &[FieldSpec] = &[
    required(field("id", Identity, High, MergeRule::None, 1.0)),
    required(field("title", Text, High, MergeRule::None, 0.9)),
    field("dueDate", Date, Medium, MergeRule::None, 0.6),
    field("priority", Categorical, Medium, Synonyms(TASK_PRIORITY), 0.4),
    field("status", Categorical, Medium, Synonyms(TASK_STATUS), 0.4),
    field("assignee", Email, Medium, MergeRule::None, 0.3),
    field("description", FreeText, Medium, SentenceUnion, 0.4),
    field("completedAt", Timestamp, Low, MergeRule::None, 0.1),
    bookkeeping(field("createdAt", Timestamp, Low, MergeRule::None, 0.1)),
    bookkeeping(field("updatedAt", Timestamp, Low, MergeRule::None, 0.1)),
];

/// The field table of a data type.
pub fn fields(data_type: DataType) -> &'static [FieldSpec] {
    match data_type {
        DataType::Contacts => CONTACTS,
        DataType::Events => EVENTS,
        DataType::Tasks => TASKS,
    }
}

/// Look up one field of a data type.
pub fn field_spec(data_type: DataType, name: &str) -> Option<&'static FieldSpec> {
    fields(data_type).iter().find(|spec| spec.name == name)
}

/// Classify a field. Fields outside the table are low severity and not
/// mergeable.
pub fn classify(data_type: DataType, name: &str) -> Classification {
    match field_spec(data_type, name) {
        Some(spec) => Classification {
            severity: spec.severity,
            merge: spec.merge,
        },
        None => Classification {
            severity: Low,
            merge: MergeRule::None,
        },
    }
}

/// Check a record against its data type's table before upload.
///
/// Every record needs an id. Creates and updates also need their required
/// fields filled in, and typed fields must hold values of the right shape.
/// Deletes only need the id.
pub fn validate_record(
    data_type: DataType,
    operation: Operation,
    record: &Record,
) -> Result<(), ValidationError> {
    if record.id().is_none() {
        return Err(ValidationError::MissingId);
    }
    if operation == Operation::Delete {
        return Ok(());
    }

    for spec in fields(data_type) {
        let value = record.get(spec.name).unwrap_or(&Value::Null);
        if is_empty(value) {
            if spec.required {
                return Err(ValidationError::MissingField {
                    data_type: data_type.to_string(),
                    field: spec.name.to_string(),
                });
            }
            continue;
        }
        check_shape(spec, value)?;
    }
    Ok(())
}

fn check_shape(spec: &FieldSpec, value: &Value) -> Result<(), ValidationError> {
    let reason = match spec.kind {
        Identity => return Ok(()),
        Number if !value.is_number() => "expected a number",
        Date | Timestamp if parse_instant(value).is_none() => "expected an instant",
        Text | FreeText | Categorical | Email | Phone if !value.is_string() => "expected text",
        _ => return Ok(()),
    };
    Err(ValidationError::InvalidField {
        field: spec.name.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_has_required_identity() {
        for dt in DataType::ALL {
            let id = field_spec(dt, "id").unwrap();
            assert_eq!(id.severity, High);
            assert!(id.required);
            assert_eq!(id.kind, Identity);
        }
    }

    #[test]
    fn classification_is_deterministic() {
        for dt in DataType::ALL {
            for spec in fields(dt) {
                let first = classify(dt, spec.name);
                for _ in 0..10 {
                    assert_eq!(classify(dt, spec.name), first);
                }
            }
        }
    }

    #[test]
    fn timestamps_are_low_and_not_diffed() {
        for dt in DataType::ALL {
            let updated = field_spec(dt, "updatedAt").unwrap();
            assert_eq!(updated.severity, Low);
            assert!(!updated.comparable);
        }
    }

    #[test]
    fn only_free_text_and_categorical_fields_merge() {
        for dt in DataType::ALL {
            for spec in fields(dt) {
                match spec.merge {
                    MergeRule::None => {}
                    MergeRule::SentenceUnion => assert_eq!(spec.kind, FreeText),
                    MergeRule::Synonyms(_) => assert_eq!(spec.kind, Categorical),
                }
            }
        }
    }

    #[test]
    fn field_names_are_unique_per_table() {
        for dt in DataType::ALL {
            let table = fields(dt);
            for (i, a) in table.iter().enumerate() {
                assert!(table[i + 1..].iter().all(|b| b.name != a.name));
            }
        }
    }

    #[test]
    fn unknown_field_is_low_and_unmergeable() {
        let c = classify(DataType::Tasks, "colour");
        assert_eq!(c.severity, Low);
        assert_eq!(c.merge, MergeRule::None);
    }

    #[test]
    fn synonym_groups_are_lowercase() {
        for dt in DataType::ALL {
            for spec in fields(dt) {
                if let MergeRule::Synonyms(groups) = spec.merge {
                    for group in groups {
                        for word in *group {
                            assert_eq!(*word, word.to_lowercase());
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn validation_requires_id_and_required_fields() {
        use serde_json::json;
        let ok = Record::from_value(json!({"id": "t1", "title": "Ship it"})).unwrap();
        assert!(validate_record(DataType::Tasks, Operation::Create, &ok).is_ok());

        let untitled = Record::from_value(json!({"id": "t1", "title": "  "})).unwrap();
        assert!(matches!(
            validate_record(DataType::Tasks, Operation::Update, &untitled),
            Err(ValidationError::MissingField { ref field, .. }) if field == "title"
        ));
        assert!(validate_record(DataType::Tasks, Operation::Delete, &untitled).is_ok());

        let anonymous = Record::from_value(json!({"title": "Ship it"})).unwrap();
        assert_eq!(
            validate_record(DataType::Tasks, Operation::Delete, &anonymous),
            Err(ValidationError::MissingId)
        );
    }

    #[test]
    fn validation_checks_value_shapes() {
        use serde_json::json;
        let bad_date =
            Record::from_value(json!({"id": "e1", "title": "Lunch", "date": "soon"})).unwrap();
        assert!(matches!(
            validate_record(DataType::Events, Operation::Create, &bad_date),
            Err(ValidationError::InvalidField { ref field, .. }) if field == "date"
        ));

        let bad_count =
            Record::from_value(json!({"id": "e1", "title": "Lunch", "attendeeCount": "ten"}))
                .unwrap();
        assert!(validate_record(DataType::Events, Operation::Create, &bad_count).is_err());
    }
}

//! Type-aware field equality.
//!
//! Two values are considered equal when a person would not call them a
//! change: instants compare as instants regardless of formatting, strings
//! compare after collapsing whitespace and case, everything else strictly.

use resync_types::parse_instant;
use serde_json::Value;

use crate::schema::FieldKind;

/// Collapse runs of whitespace, trim, and lowercase.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Compare two field values according to the field kind.
///
/// Absent fields are passed as [`Value::Null`].
pub fn values_equal(kind: FieldKind, a: &Value, b: &Value) -> bool {
    match kind {
        FieldKind::Date | FieldKind::Timestamp => match (parse_instant(a), parse_instant(b)) {
            (Some(x), Some(y)) => x == y,
            _ => strings_or_strict(a, b),
        },
        _ => strings_or_strict(a, b),
    }
}

fn strings_or_strict(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => normalize_text(x) == normalize_text(y),
        _ => a == b,
    }
}

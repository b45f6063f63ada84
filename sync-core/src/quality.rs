//! Data-quality heuristics: per-field preference and whole-record confidence.

use chrono::{DateTime, Utc};
use resync_types::{parse_instant, DataType, Record, Side};
use serde_json::Value;

use crate::merge::is_known_synonym;
use crate::schema::{fields, FieldKind, FieldSpec, MergeRule};

/// Score contributed by any non-empty value.
pub const PRESENCE_SCORE: f64 = 0.5;
/// Maximum additional score for a well-formed value.
pub const QUALITY_BONUS: f64 = 0.5;
/// Text length (in characters) that earns the full length bonus.
const DESCRIPTIVE_LENGTH: usize = 40;

/// Whether a value carries no information.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// A pragmatic email shape check: `local@domain.tld`, no whitespace.
pub fn is_valid_email(text: &str) -> bool {
    let text = text.trim();
    if text.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = text.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

fn is_valid_phone(text: &str) -> bool {
    let digits = text.chars().filter(char::is_ascii_digit).count();
    let allowed = text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'));
    allowed && digits >= 7
}

fn text_len(value: &Value) -> usize {
    value
        .as_str()
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" ").chars().count())
        .unwrap_or(0)
}

fn is_past_or_present(value: &Value, now: DateTime<Utc>) -> Option<bool> {
    parse_instant(value).map(|instant| instant <= now)
}

/// Pick the better of two values by quality alone, in order: non-empty,
/// format-valid email, longer descriptive text, non-future date.
///
/// Returns `None` when the heuristics cannot tell the values apart.
pub fn prefer_by_quality(
    spec: &FieldSpec,
    local: &Value,
    remote: &Value,
    now: DateTime<Utc>,
) -> Option<Side> {
    match (is_empty(local), is_empty(remote)) {
        (false, true) => return Some(Side::Local),
        (true, false) => return Some(Side::Remote),
        (true, true) => return None,
        (false, false) => {}
    }

    match spec.kind {
        FieldKind::Email => {
            let l = local.as_str().is_some_and(is_valid_email);
            let r = remote.as_str().is_some_and(is_valid_email);
            prefer_flag(l, r)
        }
        FieldKind::Text | FieldKind::FreeText => {
            let (l, r) = (text_len(local), text_len(remote));
            match l.cmp(&r) {
                std::cmp::Ordering::Greater => Some(Side::Local),
                std::cmp::Ordering::Less => Some(Side::Remote),
                std::cmp::Ordering::Equal => None,
            }
        }
        FieldKind::Date | FieldKind::Timestamp => {
            match (
                is_past_or_present(local, now),
                is_past_or_present(remote, now),
            ) {
                (Some(l), Some(r)) => prefer_flag(l, r),
                (Some(_), None) => Some(Side::Local),
                (None, Some(_)) => Some(Side::Remote),
                (None, None) => None,
            }
        }
        _ => None,
    }
}

fn prefer_flag(local: bool, remote: bool) -> Option<Side> {
    match (local, remote) {
        (true, false) => Some(Side::Local),
        (false, true) => Some(Side::Remote),
        _ => None,
    }
}

/// Quality score of one field value, in `[0, 1]`.
pub fn field_score(spec: &FieldSpec, value: &Value, now: DateTime<Utc>) -> f64 {
    if is_empty(value) {
        return 0.0;
    }

    let bonus = match spec.kind {
        FieldKind::Identity | FieldKind::Number => QUALITY_BONUS,
        FieldKind::Email => match value.as_str() {
            Some(s) if is_valid_email(s) => QUALITY_BONUS,
            _ => 0.0,
        },
        FieldKind::Phone => match value.as_str() {
            Some(s) if is_valid_phone(s) => QUALITY_BONUS,
            _ => 0.0,
        },
        FieldKind::Text | FieldKind::FreeText => {
            let ratio = text_len(value) as f64 / DESCRIPTIVE_LENGTH as f64;
            ratio.min(1.0) * QUALITY_BONUS
        }
        FieldKind::Date | FieldKind::Timestamp => match is_past_or_present(value, now) {
            Some(true) => QUALITY_BONUS,
            Some(false) => QUALITY_BONUS / 2.0,
            None => 0.0,
        },
        FieldKind::Categorical => match (spec.merge, value.as_str()) {
            (MergeRule::Synonyms(groups), Some(s)) if is_known_synonym(groups, s) => {
                QUALITY_BONUS
            }
            _ => QUALITY_BONUS / 2.0,
        },
    };

    PRESENCE_SCORE + bonus
}

/// Confidence in a whole record: the weighted mean of its field scores over
/// the data type's table, in `[0, 1]`.
pub fn confidence(data_type: DataType, record: &Record, now: DateTime<Utc>) -> f64 {
    let mut total = 0.0;
    let mut weight_sum = 0.0;

    for spec in fields(data_type) {
        let value = record.get(spec.name).unwrap_or(&Value::Null);
        total += spec.weight * field_score(spec, value, now);
        weight_sum += spec.weight;
    }

    if weight_sum == 0.0 {
        0.0
    } else {
        (total / weight_sum).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::field_spec;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn spec(dt: DataType, name: &str) -> &'static FieldSpec {
        field_spec(dt, name).unwrap()
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("ada@example.com"));
        assert!(!is_valid_email("ada@example"));
        assert!(!is_valid_email("ada example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@b@example.com"));
        assert!(!is_valid_email("ada@example..com"));
    }

    #[test]
    fn non_empty_beats_everything() {
        let s = spec(DataType::Contacts, "email");
        assert_eq!(
            prefer_by_quality(s, &json!("not-an-email"), &json!(""), now()),
            Some(Side::Local)
        );
    }

    #[test]
    fn valid_email_preferred() {
        let s = spec(DataType::Contacts, "email");
        assert_eq!(
            prefer_by_quality(s, &json!("ada@"), &json!("ada@example.com"), now()),
            Some(Side::Remote)
        );
        assert_eq!(
            prefer_by_quality(s, &json!("a@x.io"), &json!("b@y.io"), now()),
            None
        );
    }

    #[test]
    fn longer_text_preferred() {
        let s = spec(DataType::Events, "location");
        assert_eq!(
            prefer_by_quality(s, &json!("Park"), &json!("Central Park, north gate"), now()),
            Some(Side::Remote)
        );
    }

    #[test]
    fn non_future_date_preferred() {
        let s = spec(DataType::Tasks, "completedAt");
        assert_eq!(
            prefer_by_quality(
                s,
                &json!("2024-05-30T10:00:00Z"),
                &json!("2031-01-01T00:00:00Z"),
                now()
            ),
            Some(Side::Local)
        );
    }

    #[test]
    fn categorical_values_are_not_ranked() {
        let s = spec(DataType::Tasks, "status");
        assert_eq!(prefer_by_quality(s, &json!("done"), &json!("open"), now()), None);
    }

    #[test]
    fn field_scores_stay_in_range() {
        for dt in DataType::ALL {
            for s in fields(dt) {
                for v in [json!(null), json!("x"), json!("2024-01-01T00:00:00Z"), json!(7)] {
                    let score = field_score(s, &v, now());
                    assert!((0.0..=1.0).contains(&score), "{} {}", s.name, score);
                }
            }
        }
    }

    #[test]
    fn complete_record_is_more_confident_than_sparse_one() {
        let full = Record::from_value(json!({
            "id": "c1",
            "name": "Ada Lovelace, Countess of Lovelace",
            "email": "ada@example.com",
            "phone": "+44 20 7946 0000",
            "relationship": "friend",
            "notes": "Met at the analytical engine demo. Prefers email.",
            "updatedAt": "2024-05-01T00:00:00Z"
        }))
        .unwrap();
        let sparse = Record::from_value(json!({"id": "c1", "name": "A"})).unwrap();

        let high = confidence(DataType::Contacts, &full, now());
        let low = confidence(DataType::Contacts, &sparse, now());
        assert!(high > low + 0.2, "{} vs {}", high, low);
        assert!(high <= 1.0 && low >= 0.0);
    }
}

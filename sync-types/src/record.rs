//! Synchronised records and the stores they live in.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::ValidationError;

/// Field holding the logical record identifier.
pub const ID_FIELD: &str = "id";
/// Field holding the creation instant.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Field holding the last-modification instant.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// The synchronised data types.
///
/// Each data type maps one-to-one onto a local store name and a remote
/// dataset. The set is closed: anything else is a [`ValidationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// People and their contact details.
    Contacts,
    /// Scheduled events.
    Events,
    /// To-do items.
    Tasks,
}

impl DataType {
    /// Every data type, in a stable order.
    pub const ALL: [DataType; 3] = [DataType::Contacts, DataType::Events, DataType::Tasks];

    /// Resolve a local store name.
    pub fn from_store_name(name: &str) -> Result<Self, ValidationError> {
        match name {
            "contacts" => Ok(Self::Contacts),
            "events" => Ok(Self::Events),
            "tasks" => Ok(Self::Tasks),
            other => Err(ValidationError::UnknownStore(other.to_string())),
        }
    }

    /// The local store name for this data type.
    pub fn store_name(&self) -> &'static str {
        match self {
            Self::Contacts => "contacts",
            Self::Events => "events",
            Self::Tasks => "tasks",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_name())
    }
}

impl FromStr for DataType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_store_name(s)
    }
}

/// One version of a logical record: a JSON object with an `id` and
/// `createdAt`/`updatedAt` timestamps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Convert an arbitrary JSON value, rejecting anything but an object.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(ValidationError::NotAnObject),
        }
    }

    /// The logical record id, if present.
    ///
    /// Numeric ids are rendered in decimal so both sides compare equal.
    pub fn id(&self) -> Option<String> {
        match self.0.get(ID_FIELD)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a field value, returning the previous one.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Builder-style [`Record::set`].
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Remove a field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Iterate over `(field, value)` pairs.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Parsed `updatedAt`.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.0.get(UPDATED_AT_FIELD).and_then(parse_instant)
    }

    /// Parsed `createdAt`.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.0.get(CREATED_AT_FIELD).and_then(parse_instant)
    }

    /// Last-modified instant: `updatedAt`, falling back to `createdAt`.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated_at().or_else(|| self.created_at())
    }

    /// Stamp `updatedAt` with the given instant.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.0.insert(
            UPDATED_AT_FIELD.to_string(),
            Value::String(now.to_rfc3339()),
        );
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Parse a JSON value as an instant.
///
/// Accepts RFC 3339 strings and integer milliseconds since the Unix epoch.
pub fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_names_roundtrip() {
        for dt in DataType::ALL {
            assert_eq!(DataType::from_store_name(dt.store_name()).unwrap(), dt);
        }
    }

    #[test]
    fn unknown_store_is_rejected() {
        let err = DataType::from_store_name("invoices").unwrap_err();
        assert_eq!(err, ValidationError::UnknownStore("invoices".into()));
    }

    #[test]
    fn record_from_non_object_fails() {
        assert!(Record::from_value(json!([1, 2])).is_err());
        assert!(Record::from_value(json!({"id": "a"})).is_ok());
    }

    #[test]
    fn numeric_id_is_rendered() {
        let record = Record::from_value(json!({"id": 42})).unwrap();
        assert_eq!(record.id().as_deref(), Some("42"));
    }

    #[test]
    fn empty_id_is_absent() {
        let record = Record::from_value(json!({"id": ""})).unwrap();
        assert!(record.id().is_none());
    }

    #[test]
    fn timestamp_falls_back_to_created_at() {
        let record = Record::new().with(CREATED_AT_FIELD, "2024-03-01T10:00:00Z");
        assert_eq!(
            record.timestamp().unwrap().to_rfc3339(),
            "2024-03-01T10:00:00+00:00"
        );

        let record = record.with(UPDATED_AT_FIELD, "2024-03-02T10:00:00Z");
        assert_eq!(record.timestamp(), record.updated_at());
    }

    #[test]
    fn instants_parse_from_millis_and_offsets() {
        let a = parse_instant(&json!("2024-01-01T01:00:00+01:00")).unwrap();
        let b = parse_instant(&json!(1_704_067_200_000i64)).unwrap();
        assert_eq!(a, b);
        assert!(parse_instant(&json!("yesterday")).is_none());
    }

    #[test]
    fn touch_sets_updated_at() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut record = Record::new();
        record.touch(now);
        assert_eq!(record.updated_at(), Some(now));
    }
}

//! Queued local mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ItemId, Record, SyncError, ValidationError};

/// The kind of mutation a [`SyncItem`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// A new record.
    Create,
    /// A modified record.
    Update,
    /// A removed record (payload carries at least the id).
    Delete,
}

impl Operation {
    /// Lowercase name, as used on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ValidationError::InvalidLiteral {
                kind: "operation",
                value: other.to_string(),
            }),
        }
    }
}

/// Upload priority. Declaration order is queue order: `High` sorts first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Uploaded ahead of everything else; may trigger an early cycle.
    High,
    /// The default.
    #[default]
    Normal,
    /// Uploaded last.
    Low,
}

impl Priority {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(ValidationError::InvalidLiteral {
                kind: "priority",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting for the next cycle.
    Pending,
    /// Part of a batch currently being uploaded. Never persisted.
    Syncing,
    /// Uploaded; about to be evicted.
    Completed,
    /// Last upload failed.
    Failed,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One pending local mutation awaiting remote propagation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Unique identifier for this item.
    pub id: ItemId,
    /// When the mutation was enqueued.
    pub created_at: DateTime<Utc>,
    /// Kind of mutation.
    pub operation: Operation,
    /// Local store the record belongs to.
    pub store_name: String,
    /// The record as written locally.
    pub payload: Record,
    /// Upload priority.
    pub priority: Priority,
    /// Upload attempts so far. Never decreases.
    pub attempts: u32,
    /// When the last upload attempt finished.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub status: ItemStatus,
    /// Error recorded by the last failed attempt.
    pub last_error: Option<String>,
}

impl SyncItem {
    /// Create a new pending item.
    pub fn new(
        operation: Operation,
        store_name: impl Into<String>,
        payload: Record,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ItemId::new(),
            created_at: now,
            operation,
            store_name: store_name.into(),
            payload,
            priority,
            attempts: 0,
            last_attempt: None,
            status: ItemStatus::Pending,
            last_error: None,
        }
    }

    /// Logical id of the record this item mutates.
    pub fn record_id(&self) -> Option<String> {
        self.payload.id()
    }

    /// Serialize to MessagePack bytes for durable storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec_named(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn priority_orders_high_first() {
        let mut priorities = vec![Priority::Low, Priority::High, Priority::Normal];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::High, Priority::Normal, Priority::Low]
        );
    }

    #[test]
    fn new_item_is_pending_with_no_attempts() {
        let payload = Record::from_value(json!({"id": "c1", "name": "Ada"})).unwrap();
        let item = SyncItem::new(Operation::Create, "contacts", payload, Priority::High, now());

        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert!(item.last_attempt.is_none());
        assert_eq!(item.record_id().as_deref(), Some("c1"));
    }

    #[test]
    fn messagepack_preserves_nested_payload() {
        let payload = Record::from_value(json!({
            "id": "e1",
            "title": "Picnic",
            "attendees": ["ada", "grace"],
            "capacity": 12,
            "updatedAt": "2024-06-01T09:00:00Z"
        }))
        .unwrap();
        let mut item = SyncItem::new(Operation::Update, "events", payload, Priority::Low, now());
        item.attempts = 2;
        item.last_error = Some("timeout".into());

        let restored = SyncItem::from_bytes(&item.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, item);
    }

    #[test]
    fn literals_parse() {
        assert_eq!("delete".parse::<Operation>().unwrap(), Operation::Delete);
        assert_eq!("low".parse::<Priority>().unwrap(), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());
    }
}

//! Sync checkpoints per data type.
//!
//! A checkpoint is the instant of the last successful sync of a data type.
//! A record "changed since the last sync" when its timestamp is strictly
//! after the checkpoint. Checkpoints only move forward, so a late or
//! replayed advance can never make already-synced edits look fresh again.

use chrono::{DateTime, Utc};
use resync_types::{DataType, Record};
use std::collections::BTreeMap;

/// Last-sync instants, keyed by data type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoints {
    by_type: BTreeMap<DataType, DateTime<Utc>>,
}

impl Checkpoints {
    /// Create an empty set: every data type counts as never synced.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last sync instant of a data type.
    pub fn get(&self, data_type: DataType) -> Option<DateTime<Utc>> {
        self.by_type.get(&data_type).copied()
    }

    /// Move a checkpoint forward. Returns `true` if it moved.
    pub fn advance(&mut self, data_type: DataType, to: DateTime<Utc>) -> bool {
        match self.by_type.get(&data_type) {
            Some(current) if *current >= to => false,
            _ => {
                self.by_type.insert(data_type, to);
                true
            }
        }
    }

    /// Whether a record changed after the data type's checkpoint.
    ///
    /// Records without a timestamp, and data types never synced, count as
    /// changed.
    pub fn changed_since(&self, data_type: DataType, record: &Record) -> bool {
        match (self.get(data_type), record.timestamp()) {
            (Some(checkpoint), Some(ts)) => ts > checkpoint,
            _ => true,
        }
    }

    /// Iterate over `(data type, checkpoint)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (DataType, DateTime<Utc>)> + '_ {
        self.by_type.iter().map(|(dt, at)| (*dt, *at))
    }
}

impl FromIterator<(DataType, DateTime<Utc>)> for Checkpoints {
    fn from_iter<I: IntoIterator<Item = (DataType, DateTime<Utc>)>>(iter: I) -> Self {
        let mut checkpoints = Self::new();
        for (dt, at) in iter {
            checkpoints.advance(dt, at);
        }
        checkpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use resync_types::UPDATED_AT_FIELD;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn record_at(at: DateTime<Utc>) -> Record {
        Record::new().with(UPDATED_AT_FIELD, at.to_rfc3339())
    }

    #[test]
    fn never_synced_means_changed() {
        let checkpoints = Checkpoints::new();
        assert!(checkpoints.changed_since(DataType::Events, &record_at(t0())));
    }

    #[test]
    fn advance_only_moves_forward() {
        let mut checkpoints = Checkpoints::new();
        assert!(checkpoints.advance(DataType::Tasks, t0()));
        assert!(!checkpoints.advance(DataType::Tasks, t0() - Duration::hours(1)));
        assert!(!checkpoints.advance(DataType::Tasks, t0()));
        assert_eq!(checkpoints.get(DataType::Tasks), Some(t0()));
    }

    #[test]
    fn change_is_strictly_after_checkpoint() {
        let mut checkpoints = Checkpoints::new();
        checkpoints.advance(DataType::Contacts, t0());

        assert!(!checkpoints.changed_since(DataType::Contacts, &record_at(t0())));
        assert!(checkpoints.changed_since(
            DataType::Contacts,
            &record_at(t0() + Duration::seconds(1))
        ));
    }

    #[test]
    fn checkpoints_are_per_type() {
        let mut checkpoints = Checkpoints::new();
        checkpoints.advance(DataType::Contacts, t0());
        assert!(checkpoints.get(DataType::Events).is_none());
    }

    #[test]
    fn collect_keeps_latest() {
        let checkpoints: Checkpoints = vec![
            (DataType::Events, t0()),
            (DataType::Events, t0() - Duration::days(1)),
        ]
        .into_iter()
        .collect();
        assert_eq!(checkpoints.get(DataType::Events), Some(t0()));
    }
}

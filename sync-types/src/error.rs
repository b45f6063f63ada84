//! Error types for resync.

use thiserror::Error;

/// A mutation or record that can never be synchronised as-is.
///
/// Validation failures are fatal for the affected item: retrying the same
/// payload would fail the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The store name does not name a synchronised data type.
    #[error("unknown store: {0}")]
    UnknownStore(String),

    /// The payload is not a JSON object.
    #[error("payload must be a JSON object")]
    NotAnObject,

    /// The record carries no usable `id`.
    #[error("record has no id")]
    MissingId,

    /// A field required by the data type is absent or empty.
    #[error("{data_type} record is missing required field `{field}`")]
    MissingField {
        /// Store the record belongs to.
        data_type: String,
        /// The missing field.
        field: String,
    },

    /// A field holds a value of the wrong shape.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField {
        /// The offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Unrecognised enumeration literal (operation, priority, ...).
    #[error("invalid {kind}: {value}")]
    InvalidLiteral {
        /// What was being parsed.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },
}

/// Errors that can occur while encoding or validating resync data.
#[derive(Debug, Error)]
pub enum SyncError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Validation failed
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ValidationError::UnknownStore("widgets".into());
        assert_eq!(err.to_string(), "unknown store: widgets");

        let err = ValidationError::MissingField {
            data_type: "contacts".into(),
            field: "name".into(),
        };
        assert_eq!(
            err.to_string(),
            "contacts record is missing required field `name`"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
        assert_send_sync::<ValidationError>();
    }
}

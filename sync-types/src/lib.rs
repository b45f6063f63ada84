//! # sync-types
//!
//! Data model for resync, the offline record reconciliation engine.
//!
//! This crate provides the foundational types used across all resync crates:
//! - [`ItemId`], [`ConflictId`], [`BackupId`], [`AuditId`] - Identity types
//! - [`SyncItem`] - A buffered local mutation awaiting upload
//! - [`Record`], [`DataType`] - The synchronised records and their stores
//! - [`Conflict`], [`FieldConflict`], [`ResolutionResult`], [`Backup`] - Conflict model
//! - [`SyncError`], [`ValidationError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod conflict;
mod error;
mod ids;
mod item;
mod record;

pub use conflict::{
    AuditEntry, AuditKind, Backup, Conflict, ConflictStatus, FieldConflict, ManualDecision,
    ManualRequest, ResolutionMethod, ResolutionResult, Severity, Side, Strategy,
    SuggestedResolution,
};
pub use error::{SyncError, ValidationError};
pub use ids::{AuditId, BackupId, ConflictId, ItemId};
pub use item::{ItemStatus, Operation, Priority, SyncItem};
pub use record::{
    parse_instant, DataType, Record, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD,
};

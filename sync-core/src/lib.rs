//! # sync-core
//!
//! Pure logic for resync (no I/O, instant tests).
//!
//! This crate implements the algorithms behind the sync queue and the
//! conflict engine without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Time is always passed in as `now`, so the same input
//! produces the same output.
//!
//! The actual I/O (uploads, local writes, persistence) is performed by
//! `sync-client`, which drives these functions and interprets the actions
//! produced by the scheduler state machine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod checkpoint;
pub mod compare;
pub mod detect;
pub mod history;
pub mod merge;
pub mod quality;
pub mod queue;
pub mod schema;
pub mod state;
pub mod strategy;

pub use backoff::{reconnect_jitter, retry_delay, MAX_RETRY_DELAY};
pub use checkpoint::Checkpoints;
pub use detect::{detect_conflicts, diff_fields, divergence, suggest, Divergence};
pub use history::{BoundedLog, History};
pub use queue::{group_batches, Batch, PendingQueue, QueueStats};
pub use schema::{
    classify, field_spec, fields, validate_record, Classification, FieldKind, FieldSpec, MergeRule,
};
pub use state::{Action, Event, SchedulerState, SkipReason, HIGH_PRIORITY_DELAY};
pub use strategy::{
    apply_decision, can_auto_resolve, confidence_based, field_by_field, last_modified_wins,
    merge, newer_side, plan_automatic, supersede_remote, AutoResolvePolicy, DecisionError,
    Outcome, CONFIDENCE_MARGIN,
};

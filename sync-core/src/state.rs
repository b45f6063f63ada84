//! Sync scheduler state machine for resync.
//!
//! This module provides a pure state machine deciding *when* a sync cycle
//! runs. It takes events (timer ticks, connectivity changes, enqueues) as
//! input and produces a new state plus a list of actions to execute.
//!
//! The actual cycle (uploads, conflict hand-off) is run by sync-client, not
//! by this module. The state machine only guarantees that at most one
//! unforced cycle is active at a time.

use std::time::Duration;

use crate::backoff::reconnect_jitter;

/// Delay before the cycle triggered by a high-priority enqueue, so a burst
/// of enqueues lands in one cycle.
pub const HIGH_PRIORITY_DELAY: Duration = Duration::from_secs(1);

/// Scheduler state machine - NO I/O, just state transitions.
///
/// Connectivity and running cycles are tracked separately: losing the
/// network mid-cycle does not forget that the cycle is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerState {
    online: bool,
    active: u32,
}

impl SchedulerState {
    /// Create a new state machine: online, no cycle running.
    pub fn new() -> Self {
        Self {
            online: true,
            active: 0,
        }
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        let idle = self.online && self.active == 0;
        match event {
            // Connectivity
            Event::WentOnline if !self.online => (
                Self {
                    online: true,
                    ..self
                },
                vec![Action::RequestCycleAfter {
                    delay: reconnect_jitter(),
                }],
            ),
            Event::WentOffline => (
                Self {
                    online: false,
                    ..self
                },
                vec![],
            ),

            // Cycle requests
            Event::CycleRequested { .. } if !self.online => (
                self,
                vec![Action::SkipCycle {
                    reason: SkipReason::Offline,
                }],
            ),
            Event::CycleRequested { force } if self.active == 0 || force => (
                Self {
                    active: self.active.saturating_add(1),
                    ..self
                },
                vec![Action::BeginCycle { forced: force }],
            ),
            Event::CycleRequested { .. } => (
                self,
                vec![Action::SkipCycle {
                    reason: SkipReason::AlreadyRunning,
                }],
            ),
            Event::CycleFinished => (
                Self {
                    active: self.active.saturating_sub(1),
                    ..self
                },
                vec![],
            ),

            // Triggers that only matter while idle
            Event::IntervalElapsed | Event::Foregrounded if idle => {
                (self, vec![Action::RequestCycle { force: false }])
            }
            Event::HighPriorityEnqueued if idle => (
                self,
                vec![Action::RequestCycleAfter {
                    delay: HIGH_PRIORITY_DELAY,
                }],
            ),
            Event::ShutdownRequested { queued } if idle && queued > 0 => {
                (self, vec![Action::FlushBeforeShutdown])
            }

            // Everything else leaves the state alone
            _ => (self, vec![]),
        }
    }

    /// Check if online.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Check if a cycle is running.
    pub fn is_syncing(&self) -> bool {
        self.active > 0
    }

    /// Number of running cycles. Above one only when cycles were forced.
    pub fn active_cycles(&self) -> u32 {
        self.active
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that drive the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Connectivity came back.
    WentOnline,
    /// Connectivity was lost.
    WentOffline,
    /// The periodic timer fired.
    IntervalElapsed,
    /// The application returned to the foreground.
    Foregrounded,
    /// A high-priority item was enqueued.
    HighPriorityEnqueued,
    /// The process is about to stop.
    ShutdownRequested {
        /// Live items in the queue.
        queued: usize,
    },
    /// Someone asked for a cycle now.
    CycleRequested {
        /// Bypass the running-cycle guard.
        force: bool,
    },
    /// A cycle ended.
    CycleFinished,
}

/// Why a requested cycle did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No connectivity.
    Offline,
    /// Another cycle is running and the request was not forced.
    AlreadyRunning,
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Feed `CycleRequested` back in right away.
    RequestCycle {
        /// Bypass the running-cycle guard.
        force: bool,
    },
    /// Feed `CycleRequested` back in after a delay.
    RequestCycleAfter {
        /// How long to wait.
        delay: Duration,
    },
    /// Run a cycle; report `CycleFinished` when done.
    BeginCycle {
        /// Whether the guard was bypassed.
        forced: bool,
    },
    /// A cycle request was dropped.
    SkipCycle {
        /// Why.
        reason: SkipReason,
    },
    /// Run one last cycle before shutdown.
    FlushBeforeShutdown,
}

//! Observable scheduler state: broadcast events and counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use harvester_orchestrator_models::RunReport;
use strum_macros::AsRefStr;

/// Something the scheduler did.
#[derive(Debug, Clone, AsRefStr)]
pub enum SchedulerEvent {
    /// A run began.
    RunStarted {
        /// 1-based run number.
        run: u64,
    },
    /// A run finished and produced a report.
    RunCompleted {
        /// 1-based run number.
        run: u64,
        /// The run's report.
        report: Arc<RunReport>,
        /// Whether the items were written to the snapshot store.
        committed: bool,
    },
    /// A run ended without a report.
    RunFailed {
        /// 1-based run number.
        run: u64,
        /// What went wrong.
        error: String,
    },
    /// A tick arrived while a run was active and was dropped.
    TickSkipped,
    /// The snapshot store refused a run's items.
    CommitRejected {
        /// 1-based run number.
        run: u64,
        /// Store error.
        error: String,
    },
    /// The scheduler stopped; no further runs will start.
    Stopped,
}

/// Running totals, updated as events are emitted.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    ticks_skipped: AtomicU64,
    commits: AtomicU64,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerCounters {
    /// Runs started.
    pub runs_started: u64,
    /// Runs that produced a report.
    pub runs_completed: u64,
    /// Runs that ended without a report.
    pub runs_failed: u64,
    /// Ticks dropped because a run was active.
    pub ticks_skipped: u64,
    /// Snapshots written.
    pub commits: u64,
}

impl SchedulerStats {
    pub(crate) fn record(&self, event: &SchedulerEvent) {
        let counter = match event {
            SchedulerEvent::RunStarted { .. } => &self.runs_started,
            SchedulerEvent::RunCompleted { committed, .. } => {
                if *committed {
                    self.commits.fetch_add(1, Ordering::Relaxed);
                }
                &self.runs_completed
            }
            SchedulerEvent::RunFailed { .. } => &self.runs_failed,
            SchedulerEvent::TickSkipped => &self.ticks_skipped,
            SchedulerEvent::CommitRejected { .. } | SchedulerEvent::Stopped => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    #[must_use]
    pub fn counters(&self) -> SchedulerCounters {
        SchedulerCounters {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }
}

//! Run-wide counts
//!
//! Counts are always recomputed from per-host state, never adjusted by
//! deltas, so replayed or duplicated events cannot skew them.

use multiexec_api::{AggregateSnapshot, RunPhase, Stage};
use tokio::sync::watch;

use crate::state::{HostExecution, RunState};

/// Derive the aggregate from host records
pub fn recompute<'a>(
    total: usize,
    hosts: impl IntoIterator<Item = &'a HostExecution>,
) -> AggregateSnapshot {
    let mut snapshot = AggregateSnapshot {
        total,
        ..AggregateSnapshot::default()
    };

    for host in hosts {
        if host.started {
            snapshot.started += 1;
        }
        if host.is_success() {
            snapshot.success += 1;
        } else if host.is_failure() {
            snapshot.failure += 1;
        } else if host.stage == Stage::Stopped {
            snapshot.stopped += 1;
        }
    }

    snapshot.pending = total.saturating_sub(snapshot.success + snapshot.failure);
    snapshot
}

/// Phase and counts of a run at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunProgress {
    pub phase: RunPhase,
    pub aggregate: AggregateSnapshot,
}

/// Publishes the latest aggregate of a run
///
/// Readers hold a `watch::Receiver` and always see the most recent
/// snapshot; intermediate ones may be skipped.
#[derive(Debug)]
pub struct AggregateTracker {
    tx: watch::Sender<RunProgress>,
}

impl AggregateTracker {
    #[must_use]
    pub fn new(total: usize) -> Self {
        let (tx, _rx) = watch::channel(RunProgress {
            phase: RunPhase::Running,
            aggregate: AggregateSnapshot {
                total,
                pending: total,
                ..AggregateSnapshot::default()
            },
        });
        Self { tx }
    }

    /// Recompute from `state` and publish
    pub fn refresh(&self, state: &RunState) {
        let aggregate = state.snapshot();
        self.tx.send_if_modified(|progress| {
            if progress.aggregate == aggregate {
                false
            } else {
                progress.aggregate = aggregate;
                true
            }
        });
    }

    pub fn set_phase(&self, phase: RunPhase) {
        self.tx.send_modify(|progress| progress.phase = phase);
    }

    #[must_use]
    pub fn current(&self) -> RunProgress {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunProgress> {
        self.tx.subscribe()
    }
}

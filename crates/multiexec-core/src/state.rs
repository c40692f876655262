//! Per-host execution state and the run-wide fold over events
//!
//! `RunState` is the single place where events turn into state. The
//! coordinator folds the events its host tasks produce; a remote observer
//! folds the events it receives over the wire. Both get the same
//! guarantees: terminal stages are final, stages never move backwards, and
//! repeating a stage changes nothing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use multiexec_api::{AggregateSnapshot, OutputStream, ResultMap, RunEvent, Stage};
use tracing::{debug, warn};

use crate::aggregate;

/// What applying an event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed; the event should be delivered
    Applied,
    /// Same stage again; nothing changed
    Duplicate,
    /// Host already terminal; the event is late
    AfterTerminal,
    /// Stage is behind the host's current stage
    Backward,
}

impl Transition {
    #[must_use]
    pub fn applied(self) -> bool {
        self == Transition::Applied
    }
}

/// Lifecycle record of one host within a run
#[derive(Debug, Clone, PartialEq)]
pub struct HostExecution {
    pub host: String,
    pub stage: Stage,
    /// Outcome flag, set with `completed`
    pub ok: Option<bool>,
    pub exit_status: Option<i32>,
    pub error: Option<String>,
    /// Reached `connected` or later; never cleared
    pub started: bool,
    /// Accumulated output, when the state retains it
    pub output: String,
    pub updated_at: DateTime<Utc>,
}

impl HostExecution {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            stage: Stage::Pending,
            ok: None,
            exit_status: None,
            error: None,
            started: false,
            output: String::new(),
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.stage == Stage::Completed && self.ok == Some(true)
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        match self.stage {
            Stage::Completed => self.ok != Some(true),
            Stage::ConnectFailed | Stage::Error => true,
            _ => false,
        }
    }

    /// Outcome as reported in a results map; `None` until one exists
    #[must_use]
    pub fn result_ok(&self) -> Option<bool> {
        if self.is_success() {
            Some(true)
        } else if self.is_failure() {
            Some(false)
        } else {
            None
        }
    }

    fn transition(
        &mut self,
        stage: Stage,
        ok: Option<bool>,
        exit_status: Option<i32>,
        error: Option<String>,
    ) -> Transition {
        if self.is_terminal() {
            return Transition::AfterTerminal;
        }
        if stage == self.stage {
            return Transition::Duplicate;
        }
        if stage.rank() < self.stage.rank() {
            return Transition::Backward;
        }

        self.stage = stage;
        if stage.has_started() {
            self.started = true;
        }
        if ok.is_some() {
            self.ok = ok;
        }
        if exit_status.is_some() {
            self.exit_status = exit_status;
        }
        if error.is_some() {
            self.error = error;
        }
        self.updated_at = Utc::now();
        Transition::Applied
    }
}

/// Fold of a run's events into per-host state
#[derive(Debug, Clone, Default)]
pub struct RunState {
    total: usize,
    order: Vec<String>,
    hosts: HashMap<String, HostExecution>,
    retain_output: bool,
    cancel_requested: bool,
    finished: bool,
    unresolved: Vec<String>,
}

impl RunState {
    /// State for a known host set; every host starts `pending`
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = Self::default();
        for host in hosts {
            state.entry(&host.into());
        }
        state.total = state.order.len();
        state
    }

    /// Keep output chunks in each host's record
    #[must_use]
    pub fn with_output_retention(mut self, retain: bool) -> Self {
        self.retain_output = retain;
        self
    }

    /// Hosts in the run; at least as many as have been seen
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.max(self.order.len())
    }

    #[must_use]
    pub fn host(&self, host: &str) -> Option<&HostExecution> {
        self.hosts.get(host)
    }

    /// Hosts in resolution order
    pub fn hosts(&self) -> impl Iterator<Item = &HostExecution> {
        self.order.iter().filter_map(|host| self.hosts.get(host))
    }

    #[must_use]
    pub fn snapshot(&self) -> AggregateSnapshot {
        aggregate::recompute(self.total(), self.hosts())
    }

    /// A `done` event has been applied
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Hosts left non-terminal when the stream ended without `done`
    #[must_use]
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    #[must_use]
    pub fn non_terminal_hosts(&self) -> Vec<String> {
        self.hosts()
            .filter(|h| !h.is_terminal())
            .map(|h| h.host.clone())
            .collect()
    }

    /// Outcomes of hosts that have one
    #[must_use]
    pub fn results(&self) -> ResultMap {
        self.hosts()
            .filter_map(|h| {
                h.result_ok()
                    .map(|ok| (h.host.clone(), multiexec_api::HostResult { ok }))
            })
            .collect()
    }

    /// Record that the observer asked the run to stop
    pub fn mark_cancel_requested(&mut self) {
        self.cancel_requested = true;
    }

    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Apply one event
    pub fn apply(&mut self, event: &RunEvent) -> Transition {
        match event {
            RunEvent::Init { total_hosts, hosts } => {
                for host in hosts {
                    self.entry(host);
                }
                self.total = self.total.max(*total_hosts);
                Transition::Applied
            }
            RunEvent::HostStatus {
                host,
                stage,
                ok,
                exit_status,
                error,
            } => {
                let transition =
                    self.entry(host)
                        .transition(*stage, *ok, *exit_status, error.clone());
                if !transition.applied() {
                    debug!(host = %host, stage = %stage, ?transition, "ignoring stage update");
                }
                transition
            }
            RunEvent::Output { host, stream, data } => {
                let retain = self.retain_output;
                let record = self.entry(host);
                if record.is_terminal() {
                    debug!(host = %host, "ignoring output after terminal stage");
                    return Transition::AfterTerminal;
                }
                if retain {
                    if *stream == OutputStream::Stderr {
                        record.output.push_str("ERR> ");
                    }
                    record.output.push_str(data);
                }
                Transition::Applied
            }
            RunEvent::Summary {
                total_hosts,
                results,
                ..
            } => {
                self.total = self.total.max(*total_hosts);
                if let Some(results) = results {
                    self.reconcile(results);
                }
                Transition::Applied
            }
            RunEvent::Done { results } => {
                if let Some(results) = results {
                    self.reconcile(results);
                }
                self.finished = true;
                Transition::Applied
            }
            RunEvent::Error { .. } => Transition::Applied,
        }
    }

    /// Bring stuck hosts in line with an authoritative results map
    ///
    /// Every non-terminal host named in `results` is completed with the
    /// reported outcome. Returns the synthetic events that were applied.
    pub fn reconcile(&mut self, results: &ResultMap) -> Vec<RunEvent> {
        let mut applied = Vec::new();
        for (host, result) in results {
            let event = RunEvent::HostStatus {
                host: host.clone(),
                stage: Stage::Completed,
                ok: Some(result.ok),
                exit_status: None,
                error: None,
            };
            if self.apply(&event).applied() {
                debug!(host = %host, ok = result.ok, "reconciled host from results");
                applied.push(event);
            }
        }
        applied
    }

    /// Move every non-terminal host to `stopped`
    pub fn stop_pending(&mut self) -> Vec<RunEvent> {
        let mut applied = Vec::new();
        for host in self.non_terminal_hosts() {
            let event = RunEvent::stage(host, Stage::Stopped);
            if self.apply(&event).applied() {
                applied.push(event);
            }
        }
        applied
    }

    /// The event stream ended
    ///
    /// After `done` nothing changes. Otherwise, if the observer asked to stop,
    /// open hosts become `stopped`; if not, they stay open and are recorded as
    /// unresolved.
    pub fn transport_closed(&mut self) -> Vec<RunEvent> {
        if self.finished {
            return Vec::new();
        }
        if self.cancel_requested {
            return self.stop_pending();
        }
        self.unresolved = self.non_terminal_hosts();
        if !self.unresolved.is_empty() {
            warn!(
                hosts = ?self.unresolved,
                "event stream closed before done; host outcomes unknown"
            );
        }
        Vec::new()
    }

    fn entry(&mut self, host: &str) -> &mut HostExecution {
        if !self.hosts.contains_key(host) {
            self.order.push(host.to_string());
        }
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| HostExecution::new(host))
    }
}

#[cfg(test)]
mod tests {
    use multiexec_api::HostResult;

    use super::*;

    fn status(host: &str, stage: Stage, ok: Option<bool>) -> RunEvent {
        RunEvent::HostStatus {
            host: host.to_string(),
            stage,
            ok,
            exit_status: None,
            error: None,
        }
    }

    fn assert_sums(state: &RunState) {
        let snap = state.snapshot();
        assert_eq!(snap.success + snap.failure + snap.pending, snap.total);
    }

    #[test]
    fn test_lifecycle_counts() {
        let mut state = RunState::new(["a", "b"]);
        assert_eq!(state.snapshot().pending, 2);

        for stage in [Stage::Connecting, Stage::Connected, Stage::CommandStarted] {
            assert!(state.apply(&RunEvent::stage("a", stage)).applied());
            assert_sums(&state);
        }
        state.apply(&status("a", Stage::Completed, Some(true)));
        state.apply(&RunEvent::stage("b", Stage::ConnectFailed));

        let snap = state.snapshot();
        assert_eq!(snap.success, 1);
        assert_eq!(snap.failure, 1);
        assert_eq!(snap.pending, 0);
        assert_eq!(snap.started, 1);
        assert_sums(&state);
    }

    #[test]
    fn test_repeated_completed_counts_once() {
        let mut state = RunState::new(["a"]);
        let done = status("a", Stage::Completed, Some(true));

        assert_eq!(state.apply(&done), Transition::Applied);
        assert_eq!(state.apply(&done), Transition::AfterTerminal);

        assert_eq!(state.snapshot().success, 1);
    }

    #[test]
    fn test_late_events_after_terminal_are_discarded() {
        let mut state = RunState::new(["a"]);
        state.apply(&RunEvent::stage("a", Stage::Stopped));

        assert_eq!(
            state.apply(&status("a", Stage::Completed, Some(true))),
            Transition::AfterTerminal
        );
        let output = RunEvent::Output {
            host: "a".to_string(),
            stream: OutputStream::Stdout,
            data: "late".to_string(),
        };
        assert_eq!(state.apply(&output), Transition::AfterTerminal);
        assert_eq!(state.host("a").unwrap().stage, Stage::Stopped);
    }

    #[test]
    fn test_backward_and_duplicate_stages() {
        let mut state = RunState::new(["a"]);
        state.apply(&RunEvent::stage("a", Stage::CommandStarted));

        assert_eq!(
            state.apply(&RunEvent::stage("a", Stage::Connecting)),
            Transition::Backward
        );
        assert_eq!(
            state.apply(&RunEvent::stage("a", Stage::CommandStarted)),
            Transition::Duplicate
        );
    }

    #[test]
    fn test_completed_without_ok_is_failure() {
        let mut state = RunState::new(["a"]);
        state.apply(&RunEvent::stage("a", Stage::Completed));
        assert_eq!(state.snapshot().failure, 1);
    }

    #[test]
    fn test_stopped_hosts_count_as_pending() {
        let mut state = RunState::new(["a", "b", "c"]);
        state.apply(&status("a", Stage::Completed, Some(true)));
        let stopped = state.stop_pending();

        assert_eq!(stopped.len(), 2);
        let snap = state.snapshot();
        assert_eq!(snap.success, 1);
        assert_eq!(snap.pending, 2);
        assert_eq!(snap.stopped, 2);
        assert_sums(&state);
    }

    #[test]
    fn test_reconcile_from_results() {
        let mut state = RunState::new(["a", "b"]);
        state.apply(&RunEvent::stage("a", Stage::CommandStarted));
        state.apply(&RunEvent::stage("b", Stage::ConnectFailed));

        let mut results = ResultMap::new();
        results.insert("a".to_string(), HostResult { ok: true });
        results.insert("b".to_string(), HostResult { ok: false });

        let applied = state.reconcile(&results);

        assert_eq!(applied.len(), 1);
        assert!(state.host("a").unwrap().is_success());
        assert_eq!(state.host("b").unwrap().stage, Stage::ConnectFailed);
        assert_eq!(state.results(), results);
    }

    #[test]
    fn test_observer_learns_hosts_from_events() {
        let mut state = RunState::default().with_output_retention(true);
        state.apply(&RunEvent::Init {
            total_hosts: 2,
            hosts: vec![],
        });
        state.apply(&RunEvent::Output {
            host: "x".to_string(),
            stream: OutputStream::Stderr,
            data: "oops\n".to_string(),
        });

        assert_eq!(state.total(), 2);
        assert_eq!(state.host("x").unwrap().output, "ERR> oops\n");
        assert_eq!(state.snapshot().pending, 2);
    }

    #[test]
    fn test_done_results_reconcile_observer() {
        let mut state = RunState::new(["a"]);
        let mut results = ResultMap::new();
        results.insert("a".to_string(), HostResult { ok: false });

        state.apply(&RunEvent::Done {
            results: Some(results),
        });

        assert!(state.is_finished());
        assert_eq!(state.snapshot().failure, 1);
        assert!(state.transport_closed().is_empty());
    }

    #[test]
    fn test_close_after_user_stop_marks_stopped() {
        let mut state = RunState::new(["a", "b"]);
        state.apply(&status("a", Stage::Completed, Some(true)));
        state.mark_cancel_requested();

        let stopped = state.transport_closed();

        assert_eq!(stopped, vec![RunEvent::stage("b", Stage::Stopped)]);
        assert!(state.unresolved().is_empty());
    }

    #[test]
    fn test_unexpected_close_leaves_hosts_unresolved() {
        let mut state = RunState::new(["a", "b"]);
        state.apply(&RunEvent::stage("a", Stage::Connecting));

        assert!(state.transport_closed().is_empty());

        assert_eq!(state.unresolved(), ["a".to_string(), "b".to_string()]);
        assert_eq!(state.host("a").unwrap().stage, Stage::Connecting);
        assert_eq!(state.snapshot().pending, 2);
    }
}

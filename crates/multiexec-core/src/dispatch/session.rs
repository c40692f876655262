//! Observer side of a run

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use futures::Stream;
use multiexec_api::{AggregateSnapshot, ResultMap, RunEvent, RunInfo, RunPhase};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::RunProgress;
use crate::render;
use crate::state::RunState;

/// Cloneable control and progress view of a run
///
/// Held by the session and by the run registry; cancelling through any
/// clone stops the same run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    id: Uuid,
    job: String,
    hosts: Vec<String>,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    progress: watch::Receiver<RunProgress>,
}

impl RunHandle {
    pub(crate) fn new(
        id: Uuid,
        job: String,
        hosts: Vec<String>,
        started_at: DateTime<Utc>,
        cancel: CancellationToken,
        progress: watch::Receiver<RunProgress>,
    ) -> Self {
        Self {
            id,
            job,
            hosts,
            started_at,
            cancel,
            progress,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Resolved hosts in dispatch order
    #[must_use]
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Stop the run; a no-op once it has finished or was already cancelled
    pub fn cancel(&self) {
        if self.is_finished() {
            debug!(run_id = %self.id, "run already finished; ignoring cancel");
            return;
        }
        if !self.cancel.is_cancelled() {
            info!(run_id = %self.id, "cancelling run");
            self.cancel.cancel();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn progress(&self) -> RunProgress {
        *self.progress.borrow()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.progress().phase != RunPhase::Running
    }

    /// Wait until the run leaves the running phase
    pub async fn wait_finished(&mut self) -> RunProgress {
        // A closed channel still holds the final value
        let _ = self
            .progress
            .wait_for(|progress| progress.phase != RunPhase::Running)
            .await;
        self.progress()
    }

    #[must_use]
    pub fn info(&self) -> RunInfo {
        let progress = self.progress();
        RunInfo {
            id: self.id,
            job: self.job.clone(),
            started_at: self.started_at,
            phase: progress.phase,
            aggregate: progress.aggregate,
        }
    }
}

/// An event as it was delivered to the observer
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    pub at: DateTime<Utc>,
    pub event: RunEvent,
}

/// Final state of a finished session
#[derive(Debug, Clone)]
pub struct RunReport {
    pub id: Uuid,
    pub phase: RunPhase,
    pub aggregate: AggregateSnapshot,
    pub results: ResultMap,
    pub state: RunState,
}

/// Observer's end of a run
///
/// Yields the run's events in order until `done`, then the stream ends.
/// The most recent `log_capacity` delivered events are kept for
/// [`RunSession::export_log`].
pub struct RunSession {
    handle: RunHandle,
    events: mpsc::Receiver<RunEvent>,
    log: VecDeque<LoggedEvent>,
    log_capacity: usize,
    results: Option<ResultMap>,
    mirror: RunState,
}

impl RunSession {
    pub(crate) fn new(
        handle: RunHandle,
        events: mpsc::Receiver<RunEvent>,
        retain_output: bool,
        log_capacity: usize,
    ) -> Self {
        let mirror =
            RunState::new(handle.hosts().iter().cloned()).with_output_retention(retain_output);
        Self {
            handle,
            events,
            log: VecDeque::with_capacity(log_capacity.min(64)),
            log_capacity,
            results: None,
            mirror,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    #[must_use]
    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Host records as seen by this observer so far
    #[must_use]
    pub fn state(&self) -> &RunState {
        &self.mirror
    }

    /// Next event, or `None` after `done`
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        let event = self.events.recv().await?;
        self.mirror.apply(&event);
        if let RunEvent::Summary {
            results: Some(results),
            ..
        } = &event
        {
            self.results = Some(results.clone());
        }
        if self.log_capacity > 0 {
            if self.log.len() == self.log_capacity {
                self.log.pop_front();
            }
            self.log.push_back(LoggedEvent {
                at: Utc::now(),
                event: event.clone(),
            });
        }
        Some(event)
    }

    /// Events as a stream
    pub fn subscribe(&mut self) -> impl Stream<Item = RunEvent> + '_ {
        futures::stream::unfold(self, |session| async move {
            let event = session.next_event().await?;
            Some((event, session))
        })
    }

    /// Most recent delivered events, oldest first
    pub fn delivered(&self) -> impl Iterator<Item = &LoggedEvent> {
        self.log.iter()
    }

    /// Timestamped text of the most recent delivered events
    #[must_use]
    pub fn export_log(&self) -> String {
        let mut out = String::new();
        for entry in &self.log {
            let stamp = entry.at.format("%H:%M:%S");
            for line in render::describe(&entry.event).lines() {
                out.push_str(&format!("[{stamp}] {line}\n"));
            }
        }
        out
    }

    /// Drain the remaining events and report the final state
    pub async fn finish(mut self) -> RunReport {
        while self.next_event().await.is_some() {}

        let progress = self.handle.progress();
        let results = self
            .results
            .take()
            .unwrap_or_else(|| self.mirror.results());

        RunReport {
            id: self.handle.id(),
            phase: progress.phase,
            aggregate: self.mirror.snapshot(),
            results,
            state: self.mirror,
        }
    }
}

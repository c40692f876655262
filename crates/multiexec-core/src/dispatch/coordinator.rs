//! Run coordination
//!
//! The coordinator validates a dispatch, resolves its hosts and hands back a
//! [`RunSession`]. A spawned driver task owns the run: it starts one task
//! per host, folds their events through [`RunState`], forwards what was
//! applied, and closes with a `summary` and exactly one `done`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use multiexec_api::{DispatchRequest, HostResult, ResultMap, RunEvent, RunPhase, Stage};
use multiexec_exec::{Credentials, HostTarget, RemoteExecutor};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::host::{HostEmitter, HostOutcome, HostTask};
use super::session::{RunHandle, RunSession};
use crate::aggregate::AggregateTracker;
use crate::command::Job;
use crate::config::DispatchConfig;
use crate::error::CoreError;
use crate::hosts::{HostSpec, resolve};
use crate::state::RunState;

/// Factory for the transport used to reach each host
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    /// Create a remote executor for the given host
    async fn create_executor(&self, host: &str) -> Arc<dyn RemoteExecutor>;
}

/// One executor for every host
#[async_trait]
impl ExecutorFactory for Arc<dyn RemoteExecutor> {
    async fn create_executor(&self, _host: &str) -> Arc<dyn RemoteExecutor> {
        Arc::clone(self)
    }
}

/// A validated unit of work for a run
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub hosts: HostSpec,
    pub credentials: Credentials,
    pub job: Job,
}

impl DispatchPlan {
    pub fn new(hosts: HostSpec, credentials: Credentials, job: Job) -> Self {
        Self {
            hosts,
            credentials,
            job,
        }
    }
}

impl From<DispatchRequest> for DispatchPlan {
    fn from(request: DispatchRequest) -> Self {
        Self {
            hosts: HostSpec::from(&request),
            credentials: Credentials::new(request.ssh_user, request.ssh_pass),
            job: Job::Command {
                command: request.command,
            },
        }
    }
}

/// Starts runs
#[derive(Clone)]
pub struct DispatchCoordinator {
    factory: Arc<dyn ExecutorFactory>,
    config: DispatchConfig,
}

impl DispatchCoordinator {
    pub fn new(factory: Arc<dyn ExecutorFactory>, config: DispatchConfig) -> Self {
        Self { factory, config }
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Validate `plan` and start it
    ///
    /// Must be called from within a Tokio runtime. Nothing is emitted for a
    /// rejected plan.
    ///
    /// # Errors
    /// `InvalidSpec` or `InvalidRange` for bad host input, `InvalidRequest`
    /// for a missing user, command or file.
    #[instrument(skip(self, plan), fields(job = %plan.job.label()))]
    pub fn start(&self, plan: DispatchPlan) -> Result<RunSession, CoreError> {
        if plan.credentials.user.trim().is_empty() {
            return Err(CoreError::InvalidRequest("missing ssh user".to_string()));
        }
        plan.job.validate()?;
        let hosts = resolve(&plan.hosts)?;

        let id = Uuid::new_v4();
        let label = plan.job.label();
        let cancel = CancellationToken::new();
        let tracker = AggregateTracker::new(hosts.len());
        let (events_tx, events_rx) = mpsc::channel(self.config.event_capacity.max(1));

        let handle = RunHandle::new(
            id,
            label,
            hosts.clone(),
            Utc::now(),
            cancel.clone(),
            tracker.subscribe(),
        );

        info!(run_id = %id, hosts = hosts.len(), "starting run");

        let driver = RunDriver {
            id,
            state: RunState::new(hosts.iter().cloned())
                .with_output_retention(self.config.retain_output),
            hosts,
            credentials: plan.credentials,
            job: Arc::new(plan.job),
            factory: Arc::clone(&self.factory),
            config: self.config.clone(),
            cancel,
            tracker,
            events: events_tx,
            observer_gone: false,
        };
        tokio::spawn(driver.run());

        Ok(RunSession::new(
            handle,
            events_rx,
            self.config.retain_output,
            self.config.log_capacity,
        ))
    }
}

/// Owns a run from first event to `done`
struct RunDriver {
    id: Uuid,
    hosts: Vec<String>,
    credentials: Credentials,
    job: Arc<Job>,
    factory: Arc<dyn ExecutorFactory>,
    config: DispatchConfig,
    cancel: CancellationToken,
    state: RunState,
    tracker: AggregateTracker,
    events: mpsc::Sender<RunEvent>,
    observer_gone: bool,
}

impl RunDriver {
    async fn run(mut self) {
        let started = Instant::now();

        self.emit(RunEvent::Init {
            total_hosts: self.hosts.len(),
            hosts: self.hosts.clone(),
        })
        .await;

        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let permits = self
            .config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let mut tasks = JoinSet::new();
        let mut task_hosts: HashMap<Id, String> = HashMap::new();
        for host in &self.hosts {
            let task = HostTask {
                executor: self.factory.create_executor(host).await,
                target: HostTarget::new(host.clone(), self.credentials.clone())
                    .with_port(self.config.ssh_port),
                job: Arc::clone(&self.job),
                emitter: HostEmitter::new(host.clone(), signal_tx.clone()),
                cancel: self.cancel.clone(),
                permits: permits.clone(),
                timeout: self.config.host_timeout(),
            };
            let abort = tasks.spawn(task.run());
            task_hosts.insert(abort.id(), host.clone());
        }
        drop(signal_tx);

        let mut results = ResultMap::new();
        let mut signals_open = true;

        while signals_open || !tasks.is_empty() {
            tokio::select! {
                event = signal_rx.recv(), if signals_open => match event {
                    Some(event) => self.emit(event).await,
                    None => signals_open = false,
                },
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    self.record(joined, &mut task_hosts, &mut results).await;
                }
            }
        }

        self.finish(started, results).await;
    }

    async fn record(
        &mut self,
        joined: Result<(Id, HostOutcome), JoinError>,
        task_hosts: &mut HashMap<Id, String>,
        results: &mut ResultMap,
    ) {
        match joined {
            Ok((id, outcome)) => {
                let Some(host) = task_hosts.remove(&id) else {
                    return;
                };
                if let Some(ok) = outcome.ok() {
                    results.insert(host, HostResult { ok });
                }
            }
            Err(e) => {
                let Some(host) = task_hosts.remove(&e.id()) else {
                    return;
                };
                error!(run_id = %self.id, host = %host, error = %e, "host task failed");
                results.insert(host.clone(), HostResult { ok: false });
                self.emit(RunEvent::HostStatus {
                    host,
                    stage: Stage::Error,
                    ok: None,
                    exit_status: None,
                    error: Some(format!("host task failed: {e}")),
                })
                .await;
            }
        }
    }

    async fn finish(mut self, started: Instant, results: ResultMap) {
        for event in self.state.reconcile(&results) {
            warn!(run_id = %self.id, host = ?event.host(), "host had no terminal stage; using its result");
            self.tracker.refresh(&self.state);
            self.send(event).await;
        }

        let (phase, stopped) = closing_phase(&mut self.state, self.cancel.is_cancelled());
        for event in stopped {
            self.tracker.refresh(&self.state);
            self.send(event).await;
        }

        let stuck = self.state.non_terminal_hosts();
        if !stuck.is_empty() {
            warn!(run_id = %self.id, hosts = ?stuck, "hosts ended without an outcome");
            self.emit(RunEvent::Error {
                message: format!("no outcome for: {}", stuck.join(", ")),
            })
            .await;
        }

        let aggregate = self.state.snapshot();
        let duration_sec = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;

        info!(
            run_id = %self.id,
            total = aggregate.total,
            success = aggregate.success,
            failure = aggregate.failure,
            pending = aggregate.pending,
            duration_sec,
            ?phase,
            "run finished"
        );

        self.tracker.set_phase(phase);
        self.emit(RunEvent::Summary {
            total_hosts: aggregate.total,
            started: aggregate.started,
            success: aggregate.success,
            failure: aggregate.failure,
            duration_sec,
            results: Some(results),
        })
        .await;
        self.emit(RunEvent::Done { results: None }).await;
    }

    /// Fold an event and deliver it when it changed something
    async fn emit(&mut self, event: RunEvent) {
        if self.state.apply(&event).applied() {
            self.tracker.refresh(&self.state);
            self.send(event).await;
        } else {
            debug!(run_id = %self.id, kind = event.kind(), host = ?event.host(), "discarded event");
        }
    }

    async fn send(&mut self, event: RunEvent) {
        if self.events.send(event).await.is_err() && !self.observer_gone {
            debug!(run_id = %self.id, "observer dropped; run continues unobserved");
            self.observer_gone = true;
        }
    }
}

/// Final phase of a run whose host tasks have all ended
///
/// A cancelled run is `stopped` only if some host was left without an
/// outcome; a cancel that lands after every host finished changes nothing.
fn closing_phase(state: &mut RunState, cancelled: bool) -> (RunPhase, Vec<RunEvent>) {
    if !cancelled {
        return (RunPhase::Done, Vec::new());
    }
    let stopped = state.stop_pending();
    if stopped.is_empty() {
        (RunPhase::Done, stopped)
    } else {
        (RunPhase::Stopped, stopped)
    }
}

//! Execution of a job against one host
//!
//! Drives a host through connecting, connected, command_starting and
//! command_started, then reports a terminal stage. The session is closed
//! on every path that opened one; a cancelled host drops its session
//! instead, which tears down the connection and any running command.

use std::sync::Arc;
use std::time::Duration;

use multiexec_api::{OutputStream, RunEvent, Stage};
use multiexec_exec::{ExecError, HostTarget, OutputSink, RemoteExecutor, RemoteSession, StreamKind};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::command::{Job, ScriptPlan, UploadPlan, prepare_command};

/// How a host's work ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    /// The job ran; status of its main command
    Completed { exit_status: i32 },
    /// No session could be established
    ConnectFailed(String),
    /// The session failed after connecting, or the host timed out
    Failed(String),
    /// The run was cancelled before the host finished
    Cancelled,
}

impl HostOutcome {
    /// Result flag for the run's results map
    #[must_use]
    pub fn ok(&self) -> Option<bool> {
        match self {
            HostOutcome::Completed { exit_status } => Some(*exit_status == 0),
            HostOutcome::ConnectFailed(_) | HostOutcome::Failed(_) => Some(false),
            HostOutcome::Cancelled => None,
        }
    }

    fn event(&self, host: &str) -> Option<RunEvent> {
        let (stage, ok, exit_status, error) = match self {
            HostOutcome::Completed { exit_status } => (
                Stage::Completed,
                Some(*exit_status == 0),
                Some(*exit_status),
                None,
            ),
            HostOutcome::ConnectFailed(error) => {
                (Stage::ConnectFailed, None, None, Some(error.clone()))
            }
            HostOutcome::Failed(error) => (Stage::Error, None, None, Some(error.clone())),
            HostOutcome::Cancelled => return None,
        };
        Some(RunEvent::HostStatus {
            host: host.to_string(),
            stage,
            ok,
            exit_status,
            error,
        })
    }
}

/// Sends one host's events to the run driver
#[derive(Debug, Clone)]
pub(crate) struct HostEmitter {
    host: String,
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl HostEmitter {
    pub(crate) fn new(host: impl Into<String>, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self {
            host: host.into(),
            tx,
        }
    }

    fn send(&self, event: RunEvent) {
        // The driver outlives every host task; a closed channel means the
        // run is being torn down.
        let _ = self.tx.send(event);
    }

    fn stage(&self, stage: Stage) {
        self.send(RunEvent::stage(&self.host, stage));
    }

    fn finish(&self, outcome: &HostOutcome) {
        if let Some(event) = outcome.event(&self.host) {
            self.send(event);
        }
    }
}

impl OutputSink for HostEmitter {
    fn emit(&self, stream: StreamKind, data: String) {
        let stream = match stream {
            StreamKind::Stdout => OutputStream::Stdout,
            StreamKind::Stderr if data.trim().is_empty() => return,
            StreamKind::Stderr => OutputStream::Stderr,
        };
        self.send(RunEvent::Output {
            host: self.host.clone(),
            stream,
            data,
        });
    }
}

/// Everything a host task needs
pub(crate) struct HostTask {
    pub executor: Arc<dyn RemoteExecutor>,
    pub target: HostTarget,
    pub job: Arc<Job>,
    pub emitter: HostEmitter,
    pub cancel: CancellationToken,
    pub permits: Option<Arc<Semaphore>>,
    pub timeout: Option<Duration>,
}

impl HostTask {
    /// Run to a terminal outcome, emitting stages along the way
    #[instrument(skip(self), fields(host = %self.target.host))]
    pub(crate) async fn run(self) -> HostOutcome {
        let Self {
            executor,
            target,
            job,
            emitter,
            cancel,
            permits,
            timeout,
        } = self;

        let work = async {
            let _permit = match permits {
                Some(permits) => match permits.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(e) => return HostOutcome::Failed(e.to_string()),
                },
                None => None,
            };

            let drive = drive(executor.as_ref(), &target, &job, &emitter);
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, drive).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(host = %target.host, ?limit, "host timed out");
                        HostOutcome::Failed(ExecError::Timeout { timeout: limit }.to_string())
                    }
                },
                None => drive.await,
            }
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => HostOutcome::Cancelled,
            outcome = work => outcome,
        };

        debug!(host = %target.host, ?outcome, "host finished");
        emitter.finish(&outcome);
        outcome
    }
}

async fn drive(
    executor: &dyn RemoteExecutor,
    target: &HostTarget,
    job: &Job,
    emitter: &HostEmitter,
) -> HostOutcome {
    emitter.stage(Stage::Connecting);

    let mut session = match executor.open(target).await {
        Ok(session) => session,
        Err(e) if e.is_connect_failure() => return HostOutcome::ConnectFailed(e.to_string()),
        Err(e) => return HostOutcome::Failed(e.to_string()),
    };

    emitter.stage(Stage::Connected);

    let result = perform(session.as_mut(), target, job, emitter).await;

    if let Err(e) = session.close().await {
        debug!(host = %target.host, error = %e, "session close failed");
    }

    match result {
        Ok(exit_status) => HostOutcome::Completed { exit_status },
        Err(e) => HostOutcome::Failed(e.to_string()),
    }
}

async fn perform(
    session: &mut dyn RemoteSession,
    target: &HostTarget,
    job: &Job,
    emitter: &HostEmitter,
) -> Result<i32, ExecError> {
    match job {
        Job::Command { command } => {
            emitter.stage(Stage::CommandStarting);
            let prepared = prepare_command(command, &target.credentials);
            emitter.stage(Stage::CommandStarted);
            session.exec(&prepared, emitter).await
        }
        Job::Script {
            file_name,
            contents,
            sudo,
        } => {
            let plan = ScriptPlan::new(file_name, *sudo, &target.credentials);
            emitter.stage(Stage::CommandStarting);
            session.upload(contents, &plan.remote_path).await?;
            emitter.stage(Stage::CommandStarted);
            let status = session.exec(&plan.run, emitter).await;
            match session.exec(&plan.cleanup, emitter).await {
                Ok(0) => {}
                Ok(code) => debug!(host = %target.host, code, "script cleanup failed"),
                Err(e) => debug!(host = %target.host, error = %e, "script cleanup failed"),
            }
            status
        }
        Job::Upload {
            file_name,
            contents,
            remote_dir,
        } => {
            let plan = UploadPlan::new(file_name, remote_dir);
            emitter.stage(Stage::CommandStarting);
            let mkdir = session.exec(&plan.mkdir, emitter).await?;
            if mkdir != 0 {
                emitter.emit(
                    StreamKind::Stderr,
                    format!("{} exited with {mkdir}\n", plan.mkdir),
                );
            }
            emitter.stage(Stage::CommandStarted);
            session.upload(contents, &plan.remote_path).await?;
            emitter.emit(
                StreamKind::Stdout,
                format!("uploaded {} bytes to {}\n", contents.len(), plan.remote_path),
            );
            Ok(0)
        }
    }
}

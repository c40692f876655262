//! `RunRegistry`: in-flight runs of a daemon
//!
//! Holds a handle to every run started through the daemon so runs can be
//! listed and cancelled from outside the connection that started them.

use std::collections::HashMap;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use multiexec_api::{RunInfo, RunPhase};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatch::RunHandle;
use crate::error::CoreError;
use crate::message::{CancelAll, CancelRun, ForgetRun, GetRun, ListRuns, RegisterRun, RunListing};

/// Registry of runs by id
pub struct RunRegistry {
    runs: HashMap<Uuid, RunHandle>,
}

impl Actor for RunRegistry {
    type Args = ();
    type Error = CoreError;

    async fn on_start(_args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(id = %actor_ref.id(), "RunRegistry starting");
        Ok(Self {
            runs: HashMap::new(),
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(reason = ?reason, "RunRegistry stopping");

        self.cancel_active();
        Ok(())
    }
}

impl RunRegistry {
    fn cancel_active(&self) -> usize {
        let mut cancelled = 0;
        for (id, handle) in &self.runs {
            if !handle.is_finished() && !handle.is_cancelled() {
                info!(run_id = %id, "cancelling run");
                handle.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<RegisterRun> for RunRegistry {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: RegisterRun,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let id = msg.handle.id();
        if self.runs.contains_key(&id) {
            return Err(CoreError::RunAlreadyRegistered(id));
        }

        debug!(run_id = %id, "registering run");
        self.runs.insert(id, msg.handle);
        Ok(())
    }
}

impl Message<ForgetRun> for RunRegistry {
    type Reply = Result<(), CoreError>;

    async fn handle(&mut self, msg: ForgetRun, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.runs
            .remove(&msg.id)
            .map(|_| debug!(run_id = %msg.id, "forgot run"))
            .ok_or(CoreError::RunNotFound(msg.id))
    }
}

impl Message<ListRuns> for RunRegistry {
    type Reply = RunListing;

    async fn handle(&mut self, _msg: ListRuns, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let mut runs: Vec<RunInfo> = self.runs.values().map(RunHandle::info).collect();
        runs.sort_by_key(|run| run.started_at);
        let active = runs
            .iter()
            .filter(|run| run.phase == RunPhase::Running)
            .count();

        RunListing { runs, active }
    }
}

impl Message<GetRun> for RunRegistry {
    type Reply = Result<RunInfo, CoreError>;

    async fn handle(&mut self, msg: GetRun, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.runs
            .get(&msg.id)
            .map(RunHandle::info)
            .ok_or(CoreError::RunNotFound(msg.id))
    }
}

impl Message<CancelRun> for RunRegistry {
    type Reply = Result<RunInfo, CoreError>;

    async fn handle(&mut self, msg: CancelRun, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let handle = self
            .runs
            .get(&msg.id)
            .ok_or(CoreError::RunNotFound(msg.id))?;

        handle.cancel();
        Ok(handle.info())
    }
}

impl Message<CancelAll> for RunRegistry {
    type Reply = usize;

    async fn handle(&mut self, _msg: CancelAll, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.cancel_active()
    }
}

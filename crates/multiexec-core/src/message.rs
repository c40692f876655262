//! Message types for actor communication
//!
//! Message handlers are implemented in their respective actor modules.

use kameo_macros::Reply;
use multiexec_api::RunInfo;
use uuid::Uuid;

use crate::dispatch::RunHandle;

/// Track a started run
#[derive(Debug)]
pub struct RegisterRun {
    pub handle: RunHandle,
}

/// Stop tracking a run
#[derive(Debug)]
pub struct ForgetRun {
    pub id: Uuid,
}

/// List tracked runs
#[derive(Debug)]
pub struct ListRuns;

/// Tracked runs, oldest first
#[derive(Debug, Clone, Reply)]
pub struct RunListing {
    pub runs: Vec<RunInfo>,
    /// Runs still in the running phase
    pub active: usize,
}

/// Look up one run
#[derive(Debug)]
pub struct GetRun {
    pub id: Uuid,
}

/// Cancel one run
#[derive(Debug)]
pub struct CancelRun {
    pub id: Uuid,
}

/// Cancel every run still in flight; replies with how many were cancelled
#[derive(Debug)]
pub struct CancelAll;

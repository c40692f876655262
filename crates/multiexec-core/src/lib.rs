//! multiexec-core: Dispatch engine
//!
//! Resolves host sets, runs a job on every host concurrently, folds the
//! per-host lifecycle into run-wide counts and streams events to one
//! observer. Also holds the kameo `RunRegistry` used by the daemon.

pub mod actor;
pub mod aggregate;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hosts;
pub mod message;
pub mod render;
pub mod state;

pub use actor::RunRegistry;
pub use aggregate::{AggregateTracker, RunProgress};
pub use command::{DEFAULT_UPLOAD_DIR, Job, prepare_command};
pub use config::DispatchConfig;
pub use dispatch::{
    DispatchCoordinator, DispatchPlan, ExecutorFactory, HostOutcome, LoggedEvent, RunHandle,
    RunReport, RunSession,
};
pub use error::CoreError;
pub use hosts::{HostSpec, expand_ranges, resolve};
pub use message::{CancelAll, CancelRun, ForgetRun, GetRun, ListRuns, RegisterRun, RunListing};
pub use state::{HostExecution, RunState, Transition};

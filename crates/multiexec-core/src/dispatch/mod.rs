//! Run dispatch: coordination, per-host execution, observer sessions

pub mod coordinator;
pub mod host;
pub mod session;

pub use coordinator::{DispatchCoordinator, DispatchPlan, ExecutorFactory};
pub use host::HostOutcome;
pub use session::{LoggedEvent, RunHandle, RunReport, RunSession};

//! multiexec-api: Shared API types and schemas
//!
//! Contains the dispatch request, the run event stream, and the REST response
//! types used across the daemon, client and CLI.

pub mod events;
pub mod requests;
pub mod responses;

pub use events::{HostResult, OutputStream, ResultMap, RunEvent, Stage};
pub use requests::{ControlMessage, DispatchRequest};
pub use responses::{AggregateSnapshot, HealthResponse, RunInfo, RunPhase};

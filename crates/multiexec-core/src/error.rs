//! Core error types for multiexec-core

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur before or around a run
///
/// Per-host failures are not errors at this level: they become terminal
/// stages of the host and are counted in the aggregate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No hosts could be derived from the input
    #[error("invalid host specification: {0}")]
    InvalidSpec(String),

    /// A numeric dash-range is malformed
    #[error("invalid range `{range}`: {reason}")]
    InvalidRange {
        /// Offending range text
        range: String,
        /// What is wrong with it
        reason: String,
    },

    /// Required dispatch input is missing
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Run not found in registry
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    /// Run already exists in registry
    #[error("run already registered: {0}")]
    RunAlreadyRegistered(Uuid),

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),
}

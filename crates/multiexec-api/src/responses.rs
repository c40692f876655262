//! Response types for the API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Run-wide counts derived from the per-host stages
///
/// `success + failure + pending == total` always holds. `stopped` hosts are
/// counted inside `pending`: they never reached an outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AggregateSnapshot {
    pub total: usize,
    pub started: usize,
    pub success: usize,
    pub failure: usize,
    pub pending: usize,
    pub stopped: usize,
}

/// Lifecycle of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Running,
    Stopped,
    Done,
}

/// In-flight run as listed by the daemon
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunInfo {
    pub id: Uuid,
    /// Short description of the job (command text or file name)
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub phase: RunPhase,
    pub aggregate: AggregateSnapshot,
}

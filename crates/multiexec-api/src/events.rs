//! Run event types streamed to observers
//!
//! Every message on the dispatch WebSocket is one JSON object tagged by
//! `type`. The enum is closed: adding a variant breaks every exhaustive
//! `match` over it, which is how new kinds get noticed.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Position of a host in the per-host execution lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Connecting,
    Connected,
    CommandStarting,
    CommandStarted,
    Completed,
    ConnectFailed,
    Error,
    Stopped,
}

impl Stage {
    /// No further transition is accepted once a host is terminal
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Stage::Completed | Stage::ConnectFailed | Stage::Error | Stage::Stopped
        )
    }

    /// Ordering of the lifecycle; terminal stages share the highest rank
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Stage::Pending => 0,
            Stage::Connecting => 1,
            Stage::Connected => 2,
            Stage::CommandStarting => 3,
            Stage::CommandStarted => 4,
            Stage::Completed | Stage::ConnectFailed | Stage::Error | Stage::Stopped => 5,
        }
    }

    /// Whether a host at this stage has an open session
    #[must_use]
    pub fn has_started(self) -> bool {
        matches!(
            self,
            Stage::Connected | Stage::CommandStarting | Stage::CommandStarted | Stage::Completed
        )
    }

    /// Wire name of the stage
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Connecting => "connecting",
            Stage::Connected => "connected",
            Stage::CommandStarting => "command_starting",
            Stage::CommandStarted => "command_started",
            Stage::Completed => "completed",
            Stage::ConnectFailed => "connect_failed",
            Stage::Error => "error",
            Stage::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which output stream a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Authoritative per-host outcome carried by `summary` and `done`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HostResult {
    pub ok: bool,
}

/// Host id to outcome, ordered for stable serialization
pub type ResultMap = BTreeMap<String, HostResult>;

/// One message of the run event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Run accepted, host set resolved
    Init {
        total_hosts: usize,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        hosts: Vec<String>,
    },
    /// One host moved to a new stage
    HostStatus {
        host: String,
        stage: Stage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_status: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Output chunk from one host
    Output {
        host: String,
        stream: OutputStream,
        data: String,
    },
    /// Run-wide tally
    Summary {
        total_hosts: usize,
        started: usize,
        success: usize,
        failure: usize,
        duration_sec: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[schema(value_type = Object)]
        results: Option<ResultMap>,
    },
    /// Terminal signal, exactly one per run
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[schema(value_type = Object)]
        results: Option<ResultMap>,
    },
    /// Run-level failure, not tied to a host
    Error { message: String },
}

impl RunEvent {
    /// Plain stage transition without outcome details
    pub fn stage(host: impl Into<String>, stage: Stage) -> Self {
        RunEvent::HostStatus {
            host: host.into(),
            stage,
            ok: None,
            exit_status: None,
            error: None,
        }
    }

    /// Host the event is attributed to, if any
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        match self {
            RunEvent::HostStatus { host, .. } | RunEvent::Output { host, .. } => Some(host),
            RunEvent::Init { .. }
            | RunEvent::Summary { .. }
            | RunEvent::Done { .. }
            | RunEvent::Error { .. } => None,
        }
    }

    /// Wire tag of the event
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::Init { .. } => "init",
            RunEvent::HostStatus { .. } => "host_status",
            RunEvent::Output { .. } => "output",
            RunEvent::Summary { .. } => "summary",
            RunEvent::Done { .. } => "done",
            RunEvent::Error { .. } => "error",
        }
    }
}

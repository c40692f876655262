//! Dispatch tuning

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings applied to every run started by a coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Cap on hosts worked on at the same time; unbounded when unset
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Per-host limit from connect to completion; unbounded when unset
    #[serde(default)]
    pub host_timeout_secs: Option<u64>,
    /// Capacity of the outbound event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Keep each host's output in the run state and the session mirror
    #[serde(default)]
    pub retain_output: bool,
    /// Most recent events a session keeps for `export_log`; 0 keeps none
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// SSH port used for every host
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

fn default_event_capacity() -> usize {
    1024
}

fn default_log_capacity() -> usize {
    512
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            host_timeout_secs: None,
            event_capacity: default_event_capacity(),
            retain_output: false,
            log_capacity: default_log_capacity(),
            ssh_port: default_ssh_port(),
        }
    }
}

impl DispatchConfig {
    /// Per-host timeout as a `Duration`
    #[must_use]
    pub fn host_timeout(&self) -> Option<Duration> {
        self.host_timeout_secs.map(Duration::from_secs)
    }
}

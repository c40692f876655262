//! Connection targets and output types

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::traits::OutputSink;

/// SSH login for a run
///
/// Held only for the lifetime of a run; `Debug` never prints the password.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One host to open a session against
#[derive(Debug, Clone)]
pub struct HostTarget {
    /// Host address
    pub host: String,
    /// Port (default 22)
    pub port: u16,
    pub credentials: Credentials,
}

impl HostTarget {
    /// Create a target on the default SSH port
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port: 22,
            credentials,
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Stream a chunk of command output was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Sink that keeps every chunk in memory
#[derive(Debug, Default)]
pub struct CollectedOutput {
    chunks: Mutex<Vec<(StreamKind, String)>>,
}

impl CollectedOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenated text of one stream
    #[must_use]
    pub fn text(&self, kind: StreamKind) -> String {
        self.chunks
            .lock()
            .map(|chunks| {
                chunks
                    .iter()
                    .filter(|(k, _)| *k == kind)
                    .map(|(_, data)| data.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl OutputSink for CollectedOutput {
    fn emit(&self, stream: StreamKind, data: String) {
        if let Ok(mut chunks) = self.chunks.lock() {
            chunks.push((stream, data));
        }
    }
}

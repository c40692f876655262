//! Remote executor traits

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::{HostTarget, StreamKind};

/// Receives output chunks as a command produces them
pub trait OutputSink: Send + Sync {
    fn emit(&self, stream: StreamKind, data: String);
}

/// Opens sessions to hosts
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Connect and authenticate
    ///
    /// # Errors
    /// `ConnectionFailed` or `AuthenticationFailed` when no session could be
    /// established.
    async fn open(&self, target: &HostTarget) -> Result<Box<dyn RemoteSession>, ExecError>;

    fn executor_type(&self) -> &'static str;
}

/// An open session to one host
///
/// Dropping a session releases it; `close` does so gracefully.
#[async_trait]
pub trait RemoteSession: Send {
    /// Run a command, streaming output into `sink`, and return its exit status
    async fn exec(&mut self, cmd: &str, sink: &dyn OutputSink) -> Result<i32, ExecError>;

    /// Write `contents` to `remote_path` on the host
    async fn upload(&mut self, contents: &[u8], remote_path: &str) -> Result<(), ExecError>;

    async fn close(&mut self) -> Result<(), ExecError>;
}

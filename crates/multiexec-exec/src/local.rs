//! Local command execution using `tokio::process`

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::ExecError;
use crate::result::{HostTarget, StreamKind};
use crate::traits::{OutputSink, RemoteExecutor, RemoteSession};

/// Local command executor
///
/// Runs commands on the local machine through `sh -c`. Used for
/// `localhost` targets and in tests.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    /// Create a new local executor
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn open(&self, target: &HostTarget) -> Result<Box<dyn RemoteSession>, ExecError> {
        debug!(host = %target.host, "opening local session");
        Ok(Box::new(LocalSession {
            host: target.host.clone(),
            closed: false,
        }))
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}

/// Session on the local machine; spawned processes die with it
#[derive(Debug)]
struct LocalSession {
    host: String,
    closed: bool,
}

#[async_trait]
impl RemoteSession for LocalSession {
    #[instrument(skip(self, cmd, sink), fields(host = %self.host), level = "debug")]
    async fn exec(&mut self, cmd: &str, sink: &dyn OutputSink) -> Result<i32, ExecError> {
        if self.closed {
            return Err(ExecError::NotConnected);
        }

        let start = Instant::now();

        // Use shell to support pipes, redirections, etc.
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::SpawnError("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::SpawnError("stderr not captured".to_string()))?;

        // Output is forwarded line by line; bytes that are not UTF-8 are
        // replaced rather than failing the command.
        let mut out = BufReader::new(stdout);
        let mut err = BufReader::new(stderr);
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let mut out_open = true;
        let mut err_open = true;

        loop {
            tokio::select! {
                read = out.read_until(b'\n', &mut out_buf), if out_open => {
                    if read? == 0 {
                        out_open = false;
                    } else {
                        sink.emit(StreamKind::Stdout, String::from_utf8_lossy(&out_buf).into_owned());
                        out_buf.clear();
                    }
                }
                read = err.read_until(b'\n', &mut err_buf), if err_open => {
                    if read? == 0 {
                        err_open = false;
                    } else {
                        sink.emit(StreamKind::Stderr, String::from_utf8_lossy(&err_buf).into_owned());
                        err_buf.clear();
                    }
                }
                else => break,
            }
        }

        let status = child.wait().await?;
        let status = status.code().unwrap_or(-1);

        debug!(
            status = status,
            duration = ?start.elapsed(),
            "command completed"
        );

        Ok(status)
    }

    async fn upload(&mut self, contents: &[u8], remote_path: &str) -> Result<(), ExecError> {
        if self.closed {
            return Err(ExecError::NotConnected);
        }

        let path = Path::new(remote_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ExecError::TransferFailed(e.to_string()))?;
        }
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| ExecError::TransferFailed(e.to_string()))?;

        debug!(host = %self.host, path = %remote_path, bytes = contents.len(), "file written");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        self.closed = true;
        Ok(())
    }
}

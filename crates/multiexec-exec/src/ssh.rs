//! SSH command execution using russh crate

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::{ChannelMsg, Disconnect, client};
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::error::ExecError;
use crate::result::{HostTarget, StreamKind};
use crate::traits::{OutputSink, RemoteExecutor, RemoteSession};

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        Ok(true)
    }
}

/// Transport settings shared by every session
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Upper bound on TCP connect + handshake
    pub connect_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// SSH executor
///
/// Opens one password-authenticated session per host. Sessions are never
/// pooled: each dispatch connects, works and disconnects.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    config: SshConfig,
}

impl SshExecutor {
    #[must_use]
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Transport settings
    #[must_use]
    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    #[instrument(skip(self, target), fields(host = %target.host))]
    async fn open(&self, target: &HostTarget) -> Result<Box<dyn RemoteSession>, ExecError> {
        let port = target.port;

        info!(
            host = %target.host,
            port = port,
            user = %target.credentials.user,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());

        let connect = client::connect(config, (&target.host[..], port), SshClientHandler);
        let mut handle = match timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(ExecError::ConnectionFailed(e.to_string())),
            Err(_) => {
                return Err(ExecError::ConnectionFailed(format!(
                    "connect timed out after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let auth_res = handle
            .authenticate_password(&target.credentials.user, &target.credentials.password)
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        if !auth_res.success() {
            return Err(ExecError::AuthenticationFailed(
                "password authentication rejected".to_string(),
            ));
        }

        info!(host = %target.host, "SSH connected and authenticated");

        Ok(Box::new(SshSession {
            host: target.host.clone(),
            handle: Some(handle),
        }))
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}

/// One authenticated SSH connection
///
/// Dropping the handle tears the connection down, so a cancelled dispatch
/// releases the session without an explicit `close`.
struct SshSession {
    host: String,
    handle: Option<client::Handle<SshClientHandler>>,
}

impl SshSession {
    fn handle(&self) -> Result<&client::Handle<SshClientHandler>, ExecError> {
        self.handle.as_ref().ok_or(ExecError::NotConnected)
    }

    async fn open_sftp(&self) -> Result<SftpSession, ExecError> {
        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| ExecError::TransferFailed(format!("failed to open channel: {e}")))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ExecError::TransferFailed(format!("failed to request SFTP: {e}")))?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ExecError::TransferFailed(format!("failed to start SFTP: {e}")))
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    #[instrument(skip(self, cmd, sink), fields(host = %self.host))]
    async fn exec(&mut self, cmd: &str, sink: &dyn OutputSink) -> Result<i32, ExecError> {
        debug!("executing remote command");

        let start = Instant::now();

        let mut channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        channel
            .exec(true, cmd)
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let mut status = None;

        // ExitStatus may arrive after Eof, so read until the channel closes
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    sink.emit(
                        StreamKind::Stdout,
                        String::from_utf8_lossy(&data).into_owned(),
                    );
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        sink.emit(
                            StreamKind::Stderr,
                            String::from_utf8_lossy(&data).into_owned(),
                        );
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    status = Some(exit_status.cast_signed());
                }
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        let status = status.ok_or_else(|| {
            ExecError::IoError("channel closed without exit status".to_string())
        })?;

        debug!(
            status = status,
            duration = ?start.elapsed(),
            "remote command completed"
        );

        Ok(status)
    }

    #[instrument(skip(self, contents), fields(host = %self.host))]
    async fn upload(&mut self, contents: &[u8], remote_path: &str) -> Result<(), ExecError> {
        let sftp = self.open_sftp().await?;

        let mut file = sftp.create(remote_path).await.map_err(|e| {
            ExecError::TransferFailed(format!("failed to create {remote_path}: {e}"))
        })?;
        file.write_all(contents)
            .await
            .map_err(|e| ExecError::TransferFailed(format!("failed to write {remote_path}: {e}")))?;
        file.shutdown()
            .await
            .map_err(|e| ExecError::TransferFailed(format!("failed to flush {remote_path}: {e}")))?;
        drop(file);

        sftp.close()
            .await
            .map_err(|e| ExecError::TransferFailed(e.to_string()))?;

        debug!(path = %remote_path, bytes = contents.len(), "uploaded via SFTP");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            info!(host = %self.host, "SSH disconnected");
        }
        Ok(())
    }
}

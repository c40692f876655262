//! Error types for multiexec-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during remote execution
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Operation timed out
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),

    /// File transfer failed
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// Session was already closed
    #[error("not connected")]
    NotConnected,
}

impl ExecError {
    /// Whether the error happened before a session was established
    ///
    /// Connect failures are reported as `connect_failed`, everything else as
    /// a plain `error` stage.
    #[must_use]
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_) | ExecError::AuthenticationFailed(_)
        )
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::IoError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failure_classification() {
        assert!(ExecError::ConnectionFailed("refused".into()).is_connect_failure());
        assert!(ExecError::AuthenticationFailed("denied".into()).is_connect_failure());
        assert!(!ExecError::IoError("broken pipe".into()).is_connect_failure());
        assert!(
            !ExecError::Timeout {
                timeout: Duration::from_secs(1)
            }
            .is_connect_failure()
        );
    }
}

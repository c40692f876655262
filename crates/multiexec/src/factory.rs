//! Executor factory choosing the transport per host

use std::sync::Arc;

use async_trait::async_trait;
use multiexec_core::ExecutorFactory;
use multiexec_exec::{LocalExecutor, RemoteExecutor, SshConfig, SshExecutor};

/// Default implementation of `ExecutorFactory`
///
/// Local addresses run through `sh -c` on the daemon's machine; everything
/// else goes over SSH.
pub struct DefaultExecutorFactory {
    ssh: Arc<SshExecutor>,
    local: Arc<LocalExecutor>,
}

impl DefaultExecutorFactory {
    /// Create a new factory instance
    pub fn new(ssh: SshConfig) -> Self {
        Self {
            ssh: Arc::new(SshExecutor::new(ssh)),
            local: Arc::new(LocalExecutor::new()),
        }
    }

    fn executor_for(&self, host: &str) -> Arc<dyn RemoteExecutor> {
        // For localhost connections, use LocalExecutor
        if host == "localhost" || host == "127.0.0.1" {
            return self.local.clone();
        }

        self.ssh.clone()
    }
}

impl Default for DefaultExecutorFactory {
    fn default() -> Self {
        Self::new(SshConfig::default())
    }
}

#[async_trait]
impl ExecutorFactory for DefaultExecutorFactory {
    async fn create_executor(&self, host: &str) -> Arc<dyn RemoteExecutor> {
        self.executor_for(host)
    }
}

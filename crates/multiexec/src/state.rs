//! Application state shared across HTTP handlers

use std::sync::Arc;

use kameo::actor::ActorRef;
use multiexec_core::{DispatchCoordinator, ForgetRun, RegisterRun, RunRegistry, RunSession};
use tracing::{debug, warn};

use crate::config::Config;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Reference to the run registry actor
    pub registry: ActorRef<RunRegistry>,
    /// Starts runs
    pub coordinator: DispatchCoordinator,
    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        registry: ActorRef<RunRegistry>,
        coordinator: DispatchCoordinator,
        config: Config,
    ) -> Self {
        Self {
            registry,
            coordinator,
            config: Arc::new(config),
        }
    }

    /// Make a run visible over REST until it finishes
    pub async fn track(&self, session: &RunSession) {
        let mut handle = session.handle();
        let id = handle.id();

        if let Err(e) = self.registry.ask(RegisterRun { handle: handle.clone() }).await {
            warn!(run_id = %id, error = %e, "failed to register run");
            return;
        }

        let registry = self.registry.clone();
        tokio::spawn(async move {
            handle.wait_finished().await;
            if let Err(e) = registry.ask(ForgetRun { id }).await {
                debug!(run_id = %id, error = %e, "failed to forget run");
            }
        });
    }
}

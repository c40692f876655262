//! multiexec daemon
//!
//! Runs commands, scripts and uploads across many hosts at once and streams
//! per-host progress over WebSocket and server-sent events.

use std::sync::Arc;

use color_eyre::Result;
use kameo::actor::Spawn;
use multiexec_core::{CancelAll, DispatchCoordinator, RunRegistry};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod factory;
mod router;
mod state;

use config::{Config, LogFormat};
use factory::DefaultExecutorFactory;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let config = Config::load_default()?;
    init_tracing(&config);

    let registry = RunRegistry::spawn(());
    let factory = DefaultExecutorFactory::new(config.ssh_config());
    let coordinator = DispatchCoordinator::new(Arc::new(factory), config.dispatch_config());

    let bind = config.daemon.bind.clone();
    let state = Arc::new(AppState::new(registry.clone(), coordinator, config));
    let app = router::create_router(state);

    let listener = TcpListener::bind(&bind).await?;
    tracing::info!(addr = %bind, "multiexec daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match registry.ask(CancelAll).await {
        Ok(0) => {}
        Ok(cancelled) => tracing::info!(cancelled, "cancelled in-flight runs"),
        Err(e) => tracing::warn!(error = %e, "failed to cancel in-flight runs"),
    }
    registry.stop_gracefully().await.ok();

    tracing::info!("multiexec daemon stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.daemon.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

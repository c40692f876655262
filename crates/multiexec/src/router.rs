//! HTTP router configuration

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

use crate::api::{openapi, runs, system, transfer, ws};
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.daemon.max_upload_mb * 1024 * 1024;

    Router::new()
        // System endpoints
        .route("/health", get(system::health))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        // Dispatch
        .route("/ws", get(ws::dispatch_ws))
        .route("/upload_file", post(transfer::upload_file))
        .route("/run_script", post(transfer::run_script))
        .layer(DefaultBodyLimit::max(upload_limit))
        // Runs
        .route("/runs", get(runs::list_runs))
        .route("/runs/{id}", get(runs::get_run))
        .route("/runs/{id}/cancel", post(runs::cancel_run))
        // State
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use kameo::actor::Spawn;
    use multiexec_api::{DispatchRequest, RunEvent, Stage};
    use multiexec_client::{ClientError, DispatchClient, HttpClient, TransferTarget};
    use multiexec_core::{DispatchCoordinator, RunRegistry};
    use tokio::net::TcpListener;

    use super::*;
    use crate::config::Config;
    use crate::factory::DefaultExecutorFactory;

    async fn serve() -> HttpClient {
        let config = Config::default();
        let coordinator = DispatchCoordinator::new(
            Arc::new(DefaultExecutorFactory::new(config.ssh_config())),
            config.dispatch_config(),
        );
        let state = Arc::new(AppState::new(RunRegistry::spawn(()), coordinator, config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });

        HttpClient::new(format!("http://{addr}")).unwrap()
    }

    async fn dispatch(client: &HttpClient, request: &DispatchRequest) -> Vec<RunEvent> {
        let url = client.dispatch_url().unwrap();
        let mut ws = DispatchClient::connect(url.as_str(), request).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = ws.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_health() {
        let client = serve().await;
        assert_eq!(client.health().await.unwrap().status, "ok");
    }

    #[tokio::test]
    async fn test_dispatch_on_localhost() {
        let client = serve().await;
        let request = DispatchRequest {
            host_range: "localhost".to_string(),
            ssh_user: "me".to_string(),
            command: "echo hello".to_string(),
            ..DispatchRequest::default()
        };

        let events = dispatch(&client, &request).await;

        assert!(matches!(events.first(), Some(RunEvent::Init { total_hosts: 1, .. })));
        assert!(events.iter().any(|event| matches!(
            event,
            RunEvent::HostStatus { stage: Stage::Completed, ok: Some(true), .. }
        )));
        assert!(events.iter().any(|event| matches!(
            event,
            RunEvent::Output { data, .. } if data.contains("hello")
        )));
        assert!(matches!(events.last(), Some(RunEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_dispatch_rejects_bad_range() {
        let client = serve().await;
        let request = DispatchRequest {
            host_range: "10.0.0.9-1".to_string(),
            ssh_user: "me".to_string(),
            command: "uptime".to_string(),
            ..DispatchRequest::default()
        };

        let events = dispatch(&client, &request).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], RunEvent::Error { message } if message.contains("10.0.0.9-1")));
    }

    #[tokio::test]
    async fn test_upload_streams_lines() {
        let client = serve().await;
        let dir = std::env::temp_dir().join(format!("multiexec-router-{}", std::process::id()));
        let target = TransferTarget {
            ssh_user: "me".to_string(),
            hosts: vec!["localhost".to_string()],
            ..TransferTarget::default()
        };

        let mut lines = client
            .upload_file(&target, "note.txt", b"hi".to_vec(), dir.to_str())
            .await
            .unwrap();
        let mut all = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            all.push(line);
        }

        assert!(all[0].starts_with("Uploading note.txt"));
        assert!(all.iter().any(|line| line == "[localhost] Success"));
        assert_eq!(all.last().map(String::as_str), Some("Stream closed"));
        assert_eq!(std::fs::read(dir.join("note.txt")).unwrap(), b"hi");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_upload_without_hosts_is_rejected() {
        let client = serve().await;
        let target = TransferTarget {
            ssh_user: "me".to_string(),
            ..TransferTarget::default()
        };

        let result = client.upload_file(&target, "a.txt", b"x".to_vec(), None).await;

        assert!(matches!(result, Err(ClientError::Api { status: 400, .. })));
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let client = serve().await;

        let result = client.get_run(uuid::Uuid::new_v4()).await;
        assert!(matches!(result, Err(ClientError::Api { status: 404, .. })));

        assert!(client.list_runs().await.unwrap().is_empty());
    }
}

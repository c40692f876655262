//! Upload and script endpoints
//!
//! Both take a multipart form, run one job on every host, and stream
//! human-readable progress lines as server-sent events. Closing the
//! response cancels the run.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use multiexec_api::RunEvent;
use multiexec_api::requests::transfer_fields;
use multiexec_core::{DEFAULT_UPLOAD_DIR, DispatchPlan, HostSpec, Job, RunSession, render};
use multiexec_exec::Credentials;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::api::error::AppError;
use crate::state::AppState;

/// Parsed multipart form shared by both endpoints
#[derive(Default)]
struct TransferForm {
    ssh_user: String,
    ssh_pass: String,
    hosts: Vec<String>,
    host_range: String,
    remote_path: String,
    sudo: bool,
    file: Option<(String, Vec<u8>)>,
}

impl TransferForm {
    async fn read(mut multipart: Multipart, file_field: &str) -> Result<Self, AppError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                transfer_fields::SSH_USER => form.ssh_user = field.text().await?,
                transfer_fields::SSH_PASS => form.ssh_pass = field.text().await?,
                transfer_fields::HOST_RANGE => form.host_range = field.text().await?,
                transfer_fields::REMOTE_PATH => form.remote_path = field.text().await?,
                transfer_fields::SUDO => form.sudo = parse_flag(&field.text().await?),
                transfer_fields::HOSTS => {
                    let raw = field.text().await?;
                    if !raw.trim().is_empty() {
                        form.hosts = serde_json::from_str(&raw).map_err(|e| {
                            AppError::bad_request(format!("`hosts` must be a JSON array: {e}"))
                        })?;
                    }
                }
                other if other == file_field => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let contents = field.bytes().await?.to_vec();
                    form.file = Some((file_name, contents));
                }
                other => debug!(field = %other, "ignoring form field"),
            }
        }

        Ok(form)
    }

    fn hosts(&self) -> HostSpec {
        if self.hosts.iter().any(|host| !host.trim().is_empty()) {
            HostSpec::from_lines(self.hosts.iter().cloned())
        } else {
            HostSpec::from_range(self.host_range.clone())
        }
    }

    fn credentials(&self) -> Credentials {
        Credentials::new(self.ssh_user.clone(), self.ssh_pass.clone())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Upload one file to every host
///
/// # Errors
/// Returns `AppError` for an invalid form or host specification
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let mut form = TransferForm::read(multipart, transfer_fields::FILE).await?;
    let (file_name, contents) = form
        .file
        .take()
        .ok_or_else(|| AppError::bad_request("missing `file` field"))?;

    let remote_dir = if form.remote_path.trim().is_empty() {
        DEFAULT_UPLOAD_DIR.to_string()
    } else {
        form.remote_path.trim().to_string()
    };
    let banner = format!("Uploading {file_name} to {remote_dir}");

    let plan = DispatchPlan::new(
        form.hosts(),
        form.credentials(),
        Job::Upload {
            file_name,
            contents,
            remote_dir,
        },
    );
    start_stream(&state, plan, banner).await
}

/// Upload and run one script on every host
///
/// # Errors
/// Returns `AppError` for an invalid form or host specification
pub async fn run_script(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let mut form = TransferForm::read(multipart, transfer_fields::SCRIPT).await?;
    let (file_name, contents) = form
        .file
        .take()
        .ok_or_else(|| AppError::bad_request("missing `script` field"))?;

    let banner = if form.sudo {
        format!("Running {file_name} with sudo")
    } else {
        format!("Running {file_name}")
    };

    let plan = DispatchPlan::new(
        form.hosts(),
        form.credentials(),
        Job::Script {
            file_name,
            contents,
            sudo: form.sudo,
        },
    );
    start_stream(&state, plan, banner).await
}

async fn start_stream(
    state: &AppState,
    plan: DispatchPlan,
    banner: String,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, AppError> {
    let session = state.coordinator.start(plan)?;
    info!(run_id = %session.id(), hosts = session.handle().hosts().len(), "{banner}");
    state.track(&session).await;

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(pump_lines(session, banner, tx));

    let stream = ReceiverStream::new(rx).map(|line| Ok(Event::default().data(line)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Render the run as text lines until it is done or the client goes away
async fn pump_lines(mut session: RunSession, banner: String, tx: mpsc::Sender<String>) {
    let run_id = session.id();
    let hosts = session.handle().hosts().len();

    if tx.send(format!("{banner} on {hosts} host(s)")).await.is_err() {
        session.cancel();
        return;
    }

    while let Some(event) = session.next_event().await {
        if matches!(event, RunEvent::Init { .. }) {
            continue;
        }
        if tx.send(render::describe(&event)).await.is_err() {
            info!(run_id = %run_id, "stream client disconnected; cancelling run");
            session.cancel();
            return;
        }
    }

    let _ = tx.send("Stream closed".to_string()).await;
}

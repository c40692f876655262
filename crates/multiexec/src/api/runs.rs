//! Run registry endpoints

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use kameo::error::SendError;
use multiexec_api::RunInfo;
use multiexec_core::{CancelRun, CoreError, GetRun, ListRuns};
use uuid::Uuid;

use crate::api::error::{ApiError, AppError};
use crate::state::AppState;

fn registry_error<M>(err: SendError<M, CoreError>) -> AppError {
    match err {
        SendError::HandlerError(err) => err.into(),
        other => AppError::internal(format!("run registry unavailable: {other}")),
    }
}

/// List in-flight runs
///
/// # Errors
/// Returns `AppError` if registry communication fails
#[utoipa::path(
    get,
    path = "/runs",
    tag = "runs",
    responses((status = 200, description = "In-flight runs, oldest first", body = [RunInfo]))
)]
pub async fn list_runs(State(state): State<Arc<AppState>>) -> Result<Json<Vec<RunInfo>>, AppError> {
    let listing = state
        .registry
        .ask(ListRuns)
        .await
        .map_err(|e| AppError::internal(format!("failed to list runs: {e}")))?;

    Ok(Json(listing.runs))
}

/// Get one run
///
/// # Errors
/// Returns `AppError` if the run is unknown
#[utoipa::path(
    get,
    path = "/runs/{id}",
    tag = "runs",
    params(("id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Run found", body = RunInfo),
        (status = 404, description = "Unknown run", body = ApiError)
    )
)]
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunInfo>, AppError> {
    let info = state
        .registry
        .ask(GetRun { id })
        .await
        .map_err(registry_error)?;

    Ok(Json(info))
}

/// Cancel a run
///
/// Hosts still working are stopped; the run's observer receives the final
/// summary as usual.
///
/// # Errors
/// Returns `AppError` if the run is unknown
#[utoipa::path(
    post,
    path = "/runs/{id}/cancel",
    tag = "runs",
    params(("id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Cancellation requested", body = RunInfo),
        (status = 404, description = "Unknown run", body = ApiError)
    )
)]
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunInfo>, AppError> {
    tracing::info!(run_id = %id, "cancel requested over REST");

    let info = state
        .registry
        .ask(CancelRun { id })
        .await
        .map_err(registry_error)?;

    Ok(Json(info))
}

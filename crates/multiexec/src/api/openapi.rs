//! OpenAPI document

use axum::Json;
use multiexec_api::{
    AggregateSnapshot, ControlMessage, DispatchRequest, HealthResponse, HostResult, OutputStream,
    RunEvent, RunInfo, RunPhase, Stage,
};
use utoipa::OpenApi;

use crate::api::error::ApiError;
use crate::api::{runs, system};

#[derive(OpenApi)]
#[openapi(
    info(title = "multiexec", description = "Multi-host command dispatch daemon"),
    paths(system::health, runs::list_runs, runs::get_run, runs::cancel_run),
    components(schemas(
        ApiError,
        AggregateSnapshot,
        ControlMessage,
        DispatchRequest,
        HealthResponse,
        HostResult,
        OutputStream,
        RunEvent,
        RunInfo,
        RunPhase,
        Stage,
    )),
    tags(
        (name = "system", description = "Daemon status"),
        (name = "runs", description = "In-flight runs")
    )
)]
pub struct ApiDoc;

/// Serve the generated schema
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

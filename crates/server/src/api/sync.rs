//! Hydra synchronization endpoints.
//!
//! - `POST /sync` - Trigger a reconciliation run
//! - `GET /sync/current` - Inspect the active run
//! - `POST /sync/cancel` - Cancel the active run
//! - `GET /status` - Hydra admin API readiness
//! - `GET /runs`, `GET /runs/{id}` - Run history

use crate::error::TriggerError;
use crate::reconcile::coordinator::RunCoordinator;
use crate::reconcile::ports::AdminApi;
use crate::reconcile::run::RunRecord;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use uuid::Uuid;

/// Tag for OpenAPI documentation.
pub const SYNC_TAG: &str = "Hydra Sync API";

const DEFAULT_HISTORY_LIMIT: u64 = 20;
const MAX_HISTORY_LIMIT: u64 = 100;

/// Shared state for sync endpoints.
#[derive(Clone)]
pub struct SyncAppState {
    pub coordinator: RunCoordinator,
    pub admin: Arc<dyn AdminApi>,
}

#[derive(Debug, Deserialize, IntoParams)]
struct TriggerParams {
    /// Return immediately with the run id instead of waiting for the report.
    #[serde(default)]
    background: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
struct HistoryParams {
    /// Number of runs to return (default 20, max 100).
    limit: Option<u64>,
}

#[derive(Serialize, ToSchema)]
struct RunAccepted {
    run_id: Uuid,
}

#[derive(Serialize, ToSchema)]
struct HydraStatus {
    hydra_connected: bool,
    status: String,
}

/// Creates the sync API router.
#[tracing::instrument(skip_all)]
pub fn router(state: SyncAppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(trigger_sync))
        .routes(routes!(current_sync))
        .routes(routes!(cancel_sync))
        .routes(routes!(hydra_status))
        .routes(routes!(list_runs))
        .routes(routes!(get_run))
        .with_state(state)
}

fn already_running(active: Uuid) -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({
            "error": "A reconciliation run is already in progress",
            "active_run_id": active,
        })),
    )
        .into_response()
}

fn internal_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    post,
    path = "/sync",
    tag = SYNC_TAG,
    operation_id = "Trigger Sync",
    summary = "Reconcile Hydra with the local policy store",
    description = "Starts a reconciliation run. By default the request waits for the run to finish and \
                   returns its report. With `background=true` it returns the run id immediately.\n\n\
                   Only one run may be active at a time; concurrent triggers are rejected, not queued.",
    params(TriggerParams),
    responses(
        (status = 200, description = "Run finished", body = RunRecord),
        (status = 202, description = "Run started in the background", body = RunAccepted),
        (status = 409, description = "A run is already in progress", content_type = "application/json"),
        (status = 500, description = "The run task stopped before finishing", content_type = "application/json")
    )
)]
async fn trigger_sync(
    State(state): State<SyncAppState>,
    Query(params): Query<TriggerParams>,
) -> Response {
    if params.background {
        return match state.coordinator.trigger_background() {
            Ok(run_id) => (StatusCode::ACCEPTED, Json(RunAccepted { run_id })).into_response(),
            Err(TriggerError::AlreadyRunning(active)) => already_running(active),
            Err(e @ TriggerError::Aborted { .. }) => internal_error(&e.to_string()),
        };
    }
    match state.coordinator.trigger().await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(TriggerError::AlreadyRunning(active)) => already_running(active),
        Err(e @ TriggerError::Aborted { .. }) => internal_error(&e.to_string()),
    }
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/sync/current",
    tag = SYNC_TAG,
    operation_id = "Current Sync",
    summary = "The active reconciliation run",
    responses(
        (status = 200, description = "A run is in progress", body = RunRecord),
        (status = 404, description = "No run is in progress", content_type = "application/json")
    )
)]
async fn current_sync(State(state): State<SyncAppState>) -> Response {
    match state.coordinator.current() {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No reconciliation run in progress" })),
        )
            .into_response(),
    }
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    post,
    path = "/sync/cancel",
    tag = SYNC_TAG,
    operation_id = "Cancel Sync",
    summary = "Cancel the active reconciliation run",
    description = "Operations already in flight complete; no new operations are issued and nothing is rolled back.",
    responses(
        (status = 202, description = "Cancellation requested", body = RunAccepted),
        (status = 404, description = "No run is in progress", content_type = "application/json")
    )
)]
async fn cancel_sync(State(state): State<SyncAppState>) -> Response {
    match state.coordinator.cancel() {
        Some(run_id) => (StatusCode::ACCEPTED, Json(RunAccepted { run_id })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No reconciliation run in progress" })),
        )
            .into_response(),
    }
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/status",
    tag = SYNC_TAG,
    operation_id = "Hydra Status",
    summary = "Readiness of the Hydra admin API",
    responses(
        (status = 200, description = "Connectivity report", body = HydraStatus)
    )
)]
async fn hydra_status(State(state): State<SyncAppState>) -> Json<HydraStatus> {
    match state.admin.health().await {
        Ok(()) => Json(HydraStatus {
            hydra_connected: true,
            status: "healthy".to_string(),
        }),
        Err(e) => {
            tracing::warn!(
                name = "api.sync.hydra_status.unreachable",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                message = "Hydra admin API is not ready"
            );
            Json(HydraStatus {
                hydra_connected: false,
                status: e.to_string(),
            })
        }
    }
}

#[tracing::instrument(skip(state, params))]
#[utoipa::path(
    get,
    path = "/runs",
    tag = SYNC_TAG,
    operation_id = "List Runs",
    summary = "Recent reconciliation runs, newest first",
    params(HistoryParams),
    responses(
        (status = 200, description = "Run history", body = Vec<RunRecord>),
        (status = 500, description = "Run history unavailable", content_type = "application/json")
    )
)]
async fn list_runs(
    State(state): State<SyncAppState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    match state.coordinator.history(limit).await {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => {
            tracing::error!(
                name = "api.sync.list_runs.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                message = "Failed to load run history"
            );
            internal_error("Failed to load run history")
        }
    }
}

#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/runs/{id}",
    tag = SYNC_TAG,
    operation_id = "Get Run",
    summary = "A single reconciliation run",
    params(("id" = Uuid, Path, description = "Run id")),
    responses(
        (status = 200, description = "Run record", body = RunRecord),
        (status = 404, description = "Unknown run", content_type = "application/json"),
        (status = 500, description = "Run history unavailable", content_type = "application/json")
    )
)]
async fn get_run(State(state): State<SyncAppState>, Path(id): Path<Uuid>) -> Response {
    match state.coordinator.run(id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Run not found" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(
                name = "api.sync.get_run.failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                run_id = %id,
                error = %e,
                message = "Failed to load run"
            );
            internal_error("Failed to load run")
        }
    }
}

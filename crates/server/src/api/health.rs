//! Liveness check.

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

/// Liveness endpoint. Does not contact Hydra or the database.
#[tracing::instrument()]
#[utoipa::path(
    method(get, head),
    path = "/healthz",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Process liveness",
    description = "Returns `ok` while the process accepts requests. Use `/api/hydra/status` for \
                   Hydra connectivity.",
    responses(
        (status = 200, description = "Process is alive", body = str, content_type = "text/plain", example = "ok")
    )
)]
pub async fn health() -> &'static str {
    "ok"
}

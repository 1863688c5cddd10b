//! HTTP endpoints.
//!
//! - `sync` - Reconciliation trigger, status and history (/api/hydra/*)
//! - `health` - Liveness check (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod health;
pub mod openapi;
pub mod sync;

pub use health::MISC_TAG;
pub use sync::{SYNC_TAG, SyncAppState};

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// The full application router, with API docs served at `/api-docs`.
pub fn app_router(state: SyncAppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/api/hydra", sync::router(state))
        .routes(routes!(health::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server on `listen_addr`.
#[tracing::instrument(skip(state))]
pub async fn start_webserver(state: SyncAppState, listen_addr: &str) -> color_eyre::Result<()> {
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(
        name = "api.server.listening",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        addr = listen_addr,
        message = "Server running"
    );
    axum::serve(listener, router)
        .await
        .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}

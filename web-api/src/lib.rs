//! Operator-facing HTTP surface.
//!
//! JSON API plus a single embedded dashboard page. Runs on its own task
//! pool; no handler blocks on child I/O.

mod control;
mod error;
mod files;
mod routes;
mod state;
mod transcoding;

use std::sync::Arc;

use axum::response::Html;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

pub use error::ApiError;
pub use state::ApiState;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/api/status", get(routes::status))
        .route("/api/cameras", get(routes::cameras))
        .route("/api/recordings", get(routes::recordings))
        .route("/api/storage", get(routes::storage))
        .route("/api/system/cpu", get(routes::system_cpu))
        .route("/api/system/memory", get(routes::system_memory))
        .route("/api/logs", get(routes::logs))
        .route("/api/camera/{id}/start", post(control::start_camera))
        .route("/api/camera/{id}/stop", post(control::stop_camera))
        .route("/api/start_all", post(control::start_all))
        .route("/api/stop_all", post(control::stop_all))
        .route("/api/system/restart_cameras", post(control::restart_cameras))
        .route("/api/download/{id}/{filename}", get(files::download))
        .route("/api/delete/{id}/{filename}", delete(files::delete))
        .route("/api/transcoding/status", get(transcoding::status))
        .route("/api/transcoding/enable", post(transcoding::enable))
        .route("/api/transcoding/disable", post(transcoding::disable))
        .with_state(state)
}

/// Serve until the shutdown token fires
pub async fn serve(state: Arc<ApiState>, shutdown: CancellationToken) -> std::io::Result<()> {
    let addr = state.config.http.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("control surface listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn dashboard() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = include_str!("../static/index.html");

//! Segment download and deletion, with path-traversal guards.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::error::ApiError;
use crate::state::ApiState;

/// Filenames must be plain names inside the source directory
pub fn validate_filename(filename: &str) -> Result<(), ApiError> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
        || filename.starts_with('.')
    {
        return Err(ApiError::PathRejected);
    }
    Ok(())
}

/// Resolve a request path strictly inside the source's directory
fn resolve(state: &ApiState, id: &str, filename: &str) -> Result<PathBuf, ApiError> {
    validate_filename(filename)?;
    if !state.config.sources.contains_key(id) {
        return Err(ApiError::NotFound(format!("unknown source: {}", id)));
    }

    let dir = state.config.source_dir(id);
    let dir = dir
        .canonicalize()
        .map_err(|_| ApiError::NotFound(format!("no recordings for {}", id)))?;
    let path = dir
        .join(filename)
        .canonicalize()
        .map_err(|_| ApiError::NotFound(filename.to_string()))?;
    if !path.starts_with(&dir) {
        return Err(ApiError::PathRejected);
    }
    Ok(path)
}

pub async fn download(
    Path((id, filename)): Path<(String, String)>,
    State(state): State<Arc<ApiState>>,
) -> Result<impl IntoResponse, ApiError> {
    let path = resolve(&state, &id, &filename)?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::NotFound(filename.clone()))?;
    let stream = ReaderStream::new(file);

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from_stream(stream),
    ))
}

pub async fn delete(
    Path((id, filename)): Path<(String, String)>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = resolve(&state, &id, &filename)?;

    tokio::fs::remove_file(&path)
        .await
        .map_err(|_| ApiError::NotFound(filename.clone()))?;
    tracing::info!("deleted recording {}", path.display());
    Ok(Json(json!({ "ok": true })))
}

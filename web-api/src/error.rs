use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use capture_supervisor::ControlError;

/// Route-level failures, mapped onto conventional status codes
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    PathRejected,
    NotFound(String),
    Busy(String),
    Internal(String),
}

impl From<ControlError> for ApiError {
    fn from(e: ControlError) -> Self {
        match &e {
            ControlError::Busy => ApiError::Busy(e.to_string()),
            ControlError::NotFound(id) => ApiError::NotFound(format!("unknown source: {}", id)),
            ControlError::LaunchFailed { .. } | ControlError::Unavailable => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::PathRejected => {
                (StatusCode::BAD_REQUEST, "invalid file path".to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Busy(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        tracing::warn!("api error: {}", message);

        (status, Json(json!({ "ok": false, "error": message }))).into_response()
    }
}

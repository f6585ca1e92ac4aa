//! Mutating routes: per-source start/stop, fleet-wide operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use capture_supervisor::ControlError;

use crate::error::ApiError;
use crate::state::ApiState;

fn results_json(results: &BTreeMap<String, Result<(), ControlError>>) -> Value {
    let rendered: BTreeMap<&String, String> = results
        .iter()
        .map(|(id, result)| {
            let text = match result {
                Ok(()) => "ok".to_string(),
                Err(e) => e.to_string(),
            };
            (id, text)
        })
        .collect();
    json!(rendered)
}

pub async fn start_camera(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Value>, ApiError> {
    state.fleet.start(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn stop_camera(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Value>, ApiError> {
    state.fleet.stop(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn start_all(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let results = state.fleet.start_all().await;
    Json(json!({ "results": results_json(&results) }))
}

pub async fn stop_all(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let results = state.fleet.stop_all().await;
    Json(json!({ "results": results_json(&results) }))
}

/// Stop everything, wait for device handles to settle, start everything
pub async fn restart_cameras(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let report = state.fleet.restart_all().await;
    let failed: Vec<&String> = report
        .results
        .iter()
        .filter(|(_, r)| r.is_err())
        .map(|(id, _)| id)
        .collect();

    let message = if report.success {
        format!("restarted {} cameras", report.results.len())
    } else {
        format!(
            "restarted {} of {} cameras",
            report.results.len() - failed.len(),
            report.results.len()
        )
    };

    let mut body = json!({
        "success": report.success,
        "message": message,
        "results": results_json(&report.results),
    });
    if !failed.is_empty() {
        body["warning"] = json!(format!(
            "failed: {}",
            failed
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    Json(body)
}

//! Transcoder control routes.
//!
//! Enable/disable flip an atomic flag; disabling never interrupts a file
//! already being processed.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::ApiState;

pub async fn status(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let snapshot = state.transcoder.snapshot();
    Json(json!({
        "enabled": state.transcoder.enabled(),
        "running": snapshot.running,
        "in_schedule": snapshot.in_schedule,
        "current": snapshot.current,
        "stats": snapshot.stats,
    }))
}

pub async fn enable(State(state): State<Arc<ApiState>>) -> Json<Value> {
    state.transcoder.set_enabled(true);
    Json(json!({ "ok": true }))
}

pub async fn disable(State(state): State<Arc<ApiState>>) -> Json<Value> {
    state.transcoder.set_enabled(false);
    Json(json!({ "ok": true }))
}

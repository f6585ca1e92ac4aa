//! Read-only routes: status, cameras, recordings, storage, system, logs.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sysinfo::{Pid, ProcessesToUpdate};

use capture_supervisor::SupervisorStatus;
use storage_manager::{disk, recording_stats, scan, DiskUsage};

use crate::error::ApiError;
use crate::state::ApiState;

const RECORDINGS_DEFAULT_LIMIT: usize = 50;
const RECORDINGS_MAX_LIMIT: usize = 500;
const LOGS_DEFAULT_LINES: usize = 100;
const LOGS_MAX_LINES: usize = 1000;

/// Overall health tier shown on the dashboard
pub fn health_tier(
    snapshot: &[SupervisorStatus],
    disk: Option<&DiskUsage>,
    emergency_used: f64,
    warn_used: f64,
) -> &'static str {
    let total = snapshot.len();
    let running = snapshot.iter().filter(|s| s.healthy).count();
    let used = disk.map(|d| d.used_fraction).unwrap_or(0.0);

    if (total > 0 && running == 0) || used >= emergency_used {
        "critical"
    } else if running < total || used >= warn_used {
        "degraded"
    } else {
        "ok"
    }
}

pub async fn status(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let snapshot = state.fleet.snapshot();
    let running = snapshot.iter().filter(|s| s.healthy).count();
    let disk = disk::usage(&state.config.recordings_base_directory).ok();

    // Per-child CPU and memory
    let pids: Vec<Pid> = snapshot
        .iter()
        .filter_map(|s| s.pid)
        .map(Pid::from_u32)
        .collect();
    let mut sys = state.system.lock().await;
    sys.refresh_processes(ProcessesToUpdate::Some(&pids), true);
    let processes: Vec<Value> = snapshot
        .iter()
        .filter_map(|s| {
            let pid = s.pid?;
            let proc = sys.process(Pid::from_u32(pid));
            Some(json!({
                "id": s.id,
                "pid": pid,
                "cpu_percent": proc.map(|p| p.cpu_usage()).unwrap_or(0.0),
                "memory_bytes": proc.map(|p| p.memory()).unwrap_or(0),
            }))
        })
        .collect();
    drop(sys);

    let tier = health_tier(
        &snapshot,
        disk.as_ref(),
        state.config.storage.emergency_used_fraction,
        state.config.storage.emergency_target_fraction,
    );

    Json(json!({
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "health": tier,
        "sources_total": snapshot.len(),
        "sources_running": running,
        "recording": running > 0,
        "disk": disk,
        "processes": processes,
        "transcoding_enabled": state.transcoder.enabled(),
    }))
}

pub async fn cameras(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let cameras: Vec<Value> = state
        .fleet
        .snapshot()
        .into_iter()
        .map(|status| {
            let source = state.fleet.get(&status.id).map(|h| h.source.clone());
            json!({
                "id": status.id,
                "name": source.as_ref().map(|s| s.name.clone()).unwrap_or_default(),
                "device": source.as_ref().map(|s| s.device.clone()).unwrap_or_default(),
                "resolution": source.as_ref().map(|s| s.resolution.to_string()).unwrap_or_default(),
                "framerate": source.as_ref().map(|s| s.framerate).unwrap_or(0),
                "state": status.state,
                "recording": status.healthy,
                "healthy": status.healthy,
                "pid": status.pid,
                "uptime_secs": status.uptime_secs,
            })
        })
        .collect();
    Json(json!(cameras))
}

#[derive(Deserialize)]
pub struct RecordingsQuery {
    camera: Option<String>,
    limit: Option<usize>,
}

pub async fn recordings(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<RecordingsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(RECORDINGS_DEFAULT_LIMIT)
        .min(RECORDINGS_MAX_LIMIT);
    let camera = match query.camera.as_deref() {
        None | Some("all") => None,
        Some(id) => Some(id),
    };

    let mut segments = scan(&state.config.recordings_base_directory, camera)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    segments.sort_by(|a, b| b.modified.cmp(&a.modified));
    segments.truncate(limit);

    let recordings: Vec<Value> = segments
        .into_iter()
        .map(|seg| {
            let filename = seg
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            json!({
                "id": filename.trim_end_matches(".mp4").trim_end_matches(".mkv"),
                "camera": seg.source_id,
                "filename": filename,
                "size": seg.size,
                "size_mb": (seg.size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
                "mtime": DateTime::<Local>::from(seg.modified).to_rfc3339(),
            })
        })
        .collect();
    Ok(Json(json!(recordings)))
}

pub async fn storage(State(state): State<Arc<ApiState>>) -> Result<Json<Value>, ApiError> {
    let base = &state.config.recordings_base_directory;
    let usage = disk::usage(base).map_err(|e| ApiError::Internal(e.to_string()))?;
    let stats = recording_stats(base).map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "total_bytes": usage.total_bytes,
        "free_bytes": usage.free_bytes,
        "used_bytes": usage.used_bytes(),
        "used_fraction": usage.used_fraction,
        "total_files": stats.total_files,
        "recordings_bytes": stats.total_bytes,
        "sources": stats.sources,
        "emergency_used_fraction": state.config.storage.emergency_used_fraction,
    })))
}

pub async fn system_cpu(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let mut sys = state.system.lock().await;
    sys.refresh_cpu_usage();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_usage();
    let percent = sys.global_cpu_usage();
    let count = sys.cpus().len();
    Json(json!({ "percent": percent, "count": count }))
}

pub async fn system_memory(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let mut sys = state.system.lock().await;
    sys.refresh_memory();
    let total = sys.total_memory();
    let used = sys.used_memory();
    Json(json!({
        "total": total,
        "used": used,
        "available": sys.available_memory(),
        "percent": if total > 0 { used as f64 / total as f64 * 100.0 } else { 0.0 },
    }))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    lines: Option<usize>,
}

pub async fn logs(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<LogsQuery>,
) -> Json<Value> {
    let lines = query
        .lines
        .unwrap_or(LOGS_DEFAULT_LINES)
        .min(LOGS_MAX_LINES);
    Json(json!(state.log_ring.tail(lines)))
}

//! The single-slot re-encode engine.
//!
//! One long-lived task: evaluate gates, pick the oldest candidate, run one
//! re-encode child at the lowest scheduler priority, verify, swap, repeat.
//! Cancellation interrupts the child and deletes the temp; a cancelled run
//! never swaps.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Local, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use config_manager::{Config, ScheduleWindow};

use crate::candidates::find_candidates;
use crate::error::TranscodeError;
use crate::gates::{self, ResourceGauge};
use crate::probe;
use crate::stats::TranscodingStats;
use crate::swap::{self, transcoding_path, TranscodeMarker};
use crate::verify;

/// Poll again this often while a gate is held
const GATE_POLL: Duration = Duration::from_secs(60);
/// Poll again this often when no candidates exist
const IDLE_POLL: Duration = Duration::from_secs(300);
/// Progress sampling interval while the child runs
const PROGRESS_POLL: Duration = Duration::from_secs(2);
/// Grace between interrupt and kill when cancelling the child
const CANCEL_WAIT: Duration = Duration::from_secs(30);
/// Expected output size as a fraction of the original, for progress
const TARGET_RATIO: f64 = 0.6;

const RENICE: [&str; 5] = ["-n", "19", "ionice", "-c", "3"];
const TRANSCODER_BIN: &str = "ffmpeg";

/// Live progress of the current file
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub file: String,
    pub source_id: String,
    pub original_bytes: u64,
    pub current_bytes: u64,
    pub percent: f64,
}

/// Snapshot served through `/api/transcoding/status`
#[derive(Debug, Clone, Serialize, Default)]
pub struct EngineStatus {
    pub running: bool,
    pub in_schedule: bool,
    pub current: Option<Progress>,
    pub stats: TranscodingStats,
}

/// Shared handle for the HTTP layer and CLI
#[derive(Clone)]
pub struct TranscoderHandle {
    enabled: Arc<AtomicBool>,
    status: Arc<Mutex<EngineStatus>>,
    window: ScheduleWindow,
}

impl TranscoderHandle {
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the operator flag. Disabling never interrupts the current file;
    /// the engine quiesces after it completes.
    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
        tracing::info!("transcoder {}", if on { "enabled" } else { "disabled" });
    }

    /// Copy the whole status under the lock to avoid torn reads
    pub fn snapshot(&self) -> EngineStatus {
        let mut status = match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        status.in_schedule = self.window.contains(Local::now().time());
        status
    }
}

/// Spawn the engine task. The handle is usable immediately; persisted stats
/// are loaded before the first poll.
pub fn spawn_engine(
    config: Arc<Config>,
    shutdown: CancellationToken,
) -> (TranscoderHandle, tokio::task::JoinHandle<()>) {
    let window = config
        .transcoder
        .schedule_window()
        .unwrap_or(ScheduleWindow {
            start: chrono::NaiveTime::MIN,
            end: chrono::NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(chrono::NaiveTime::MIN),
        });
    let enabled = Arc::new(AtomicBool::new(config.transcoder.enabled));
    let stats = TranscodingStats::load(&config.recordings_base_directory);
    let status = Arc::new(Mutex::new(EngineStatus {
        running: false,
        in_schedule: false,
        current: None,
        stats,
    }));

    let handle = TranscoderHandle {
        enabled: enabled.clone(),
        status: status.clone(),
        window,
    };

    let engine = Engine {
        config,
        window,
        enabled,
        status,
        gauge: ResourceGauge::new(),
        shutdown,
    };
    let join = tokio::spawn(engine.run());
    (handle, join)
}

struct Engine {
    config: Arc<Config>,
    window: ScheduleWindow,
    enabled: Arc<AtomicBool>,
    status: Arc<Mutex<EngineStatus>>,
    gauge: ResourceGauge,
    shutdown: CancellationToken,
}

impl Engine {
    fn base(&self) -> &Path {
        &self.config.recordings_base_directory
    }

    fn stats(&self) -> TranscodingStats {
        match self.status.lock() {
            Ok(status) => status.stats.clone(),
            Err(poisoned) => poisoned.into_inner().stats.clone(),
        }
    }

    fn update_status(&self, update: impl FnOnce(&mut EngineStatus)) {
        let mut status = match self.status.lock() {
            Ok(status) => status,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut status);
    }

    /// Sleep, returning true when shutdown fired instead
    async fn sleep_cancellable(&self, d: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(d) => false,
            _ = self.shutdown.cancelled() => true,
        }
    }

    async fn run(mut self) {
        tracing::info!("transcode engine started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let base = self.base().to_path_buf();
            let held = gates::evaluate(
                &self.config.transcoder,
                &self.window,
                &self.enabled,
                &mut self.gauge,
                &base,
                &self.shutdown,
            );
            if let Err(held) = held {
                tracing::debug!("transcode gate held: {}", held);
                if self.sleep_cancellable(GATE_POLL).await {
                    break;
                }
                continue;
            }

            let min_age =
                Duration::from_secs(self.config.transcoder.min_age_days as u64 * 86400);
            let candidates = match find_candidates(self.base(), min_age) {
                Ok((candidates, _)) => candidates,
                Err(e) => {
                    tracing::error!("candidate scan failed: {}", e);
                    if self.sleep_cancellable(GATE_POLL).await {
                        break;
                    }
                    continue;
                }
            };
            if candidates.is_empty() {
                if self.sleep_cancellable(IDLE_POLL).await {
                    break;
                }
                continue;
            }

            for path in candidates {
                if self.shutdown.is_cancelled() || !self.enabled.load(Ordering::SeqCst) {
                    break;
                }
                // Conditions may have changed while the previous file ran
                let base = self.base().to_path_buf();
                if let Err(held) = gates::evaluate(
                    &self.config.transcoder,
                    &self.window,
                    &self.enabled,
                    &mut self.gauge,
                    &base,
                    &self.shutdown,
                ) {
                    tracing::debug!("transcode gate held: {}", held);
                    break;
                }
                self.transcode_one(&path).await;
            }
        }

        self.update_status(|s| {
            s.running = false;
            s.current = None;
        });
        tracing::info!("transcode engine stopped");
    }

    async fn transcode_one(&mut self, p: &Path) {
        tracing::info!("transcoding {}", p.display());
        let started = std::time::Instant::now();

        let result = self.run_one(p).await;
        self.update_status(|s| {
            s.running = false;
            s.current = None;
        });

        match result {
            Ok(marker) => {
                self.update_status(|s| {
                    s.stats
                        .record_success(marker.original_size, marker.new_size, marker.transcoded_at)
                });
                tracing::info!(
                    "replaced {} in {:.1}s: {} -> {} bytes ({} saved)",
                    p.display(),
                    started.elapsed().as_secs_f64(),
                    marker.original_size,
                    marker.new_size,
                    marker.savings_bytes
                );
            }
            Err(TranscodeError::Cancelled) => {
                tracing::info!("transcode of {} cancelled", p.display());
            }
            Err(e) => {
                self.update_status(|s| s.stats.record_failure(&e));
                tracing::error!("failed to transcode {}: {}", p.display(), e);
            }
        }

        if let Err(e) = self.stats().save(self.base()) {
            tracing::error!("failed to persist transcoding stats: {}", e);
        }
    }

    async fn run_one(&mut self, p: &Path) -> Result<TranscodeMarker, TranscodeError> {
        let original_info = probe::probe(p)?;
        let original_size = std::fs::metadata(p)?.len();
        let temp = transcoding_path(p);
        let source_id = p
            .parent()
            .and_then(|d| d.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.update_status(|s| {
            s.running = true;
            s.current = Some(Progress {
                file: p.display().to_string(),
                source_id: source_id.clone(),
                original_bytes: original_size,
                current_bytes: 0,
                percent: 0.0,
            });
        });

        let mut child = self.spawn_child(p, &temp)?;
        let stderr_tail = Arc::new(Mutex::new(Vec::new()));
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut tail = match tail.lock() {
                        Ok(tail) => tail,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if tail.len() >= 16 {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
            });
        }

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = self.shutdown.cancelled() => {
                    self.cancel_child(&mut child).await;
                    let _ = std::fs::remove_file(&temp);
                    return Err(TranscodeError::Cancelled);
                }
                _ = tokio::time::sleep(PROGRESS_POLL) => {
                    let current = std::fs::metadata(&temp).map(|m| m.len()).unwrap_or(0);
                    let expected = (original_size as f64 * TARGET_RATIO).max(1.0);
                    let percent = progress_percent(current, expected as u64);
                    self.update_status(|s| {
                        if let Some(progress) = s.current.as_mut() {
                            progress.current_bytes = current;
                            progress.percent = percent;
                        }
                    });
                }
            }
        };

        if !status.success() {
            let _ = std::fs::remove_file(&temp);
            let tail = match stderr_tail.lock() {
                Ok(tail) => tail.join(" | "),
                Err(poisoned) => poisoned.into_inner().join(" | "),
            };
            return Err(TranscodeError::ChildFailed(format!(
                "exit {:?}: {}",
                status.code(),
                tail
            )));
        }

        match self.verify_and_swap(p, &temp, &original_info, original_size) {
            Ok(marker) => Ok(marker),
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                Err(e)
            }
        }
    }

    /// Launch the re-encode child at the lowest priority and idle I/O class
    fn spawn_child(&self, input: &Path, temp: &Path) -> Result<tokio::process::Child, TranscodeError> {
        let t = &self.config.transcoder;
        let mut cmd = Command::new("nice");
        cmd.args(RENICE)
            .arg(TRANSCODER_BIN)
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-c:v", &t.output_codec, "-preset", &t.preset])
            .args(["-crf", &t.quality.to_string()])
            .args(["-c:a", "copy", "-movflags", "+faststart", "-f", "mp4", "-y"])
            .arg(temp)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.spawn().map_err(|e| TranscodeError::ChildFailed(e.to_string()))
    }

    /// SIGINT, bounded wait, then kill
    async fn cancel_child(&self, child: &mut tokio::process::Child) {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
        }
        if tokio::time::timeout(CANCEL_WAIT, child.wait()).await.is_err() {
            let _ = child.kill().await;
        }
    }

    fn verify_and_swap(
        &self,
        p: &Path,
        temp: &Path,
        original_info: &probe::VideoInfo,
        original_size: u64,
    ) -> Result<TranscodeMarker, TranscodeError> {
        let temp_size = std::fs::metadata(temp).map(|m| m.len()).unwrap_or(0);
        verify::check_size_floor(temp_size)?;

        let temp_info = probe::probe(temp)?;
        verify::check_metadata(original_info, &temp_info)?;
        probe::verify_integrity(temp)?;
        verify::check_savings(
            original_size,
            temp_size,
            self.config.transcoder.min_savings_percent,
        )?;

        swap::swap_in(
            p,
            ChronoDuration::days(self.config.transcoder.keep_original_days as i64),
            Utc::now(),
        )
    }
}

/// Derived completion estimate, capped below 100 until the swap
pub fn progress_percent(current: u64, expected: u64) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    (current as f64 / expected as f64 * 100.0).min(99.0)
}

/// Deferred-delete sweep entry point used by the health monitor
pub fn run_deferred_sweep(base: &Path, limit: usize) -> crate::swap::SweepOutcome {
    match swap::deferred_delete_sweep(base, limit, Utc::now()) {
        Ok(outcome) => {
            if outcome.originals_deleted > 0 {
                tracing::info!(
                    "deferred delete: removed {} originals ({} bytes)",
                    outcome.originals_deleted,
                    outcome.bytes_freed
                );
            }
            outcome
        }
        Err(e) => {
            tracing::error!("deferred delete sweep failed: {}", e);
            crate::swap::SweepOutcome::default()
        }
    }
}

//! Health monitor: one periodic tick driving liveness checks, pruning, and
//! the deferred-delete sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use capture_supervisor::Fleet;
use config_manager::Config;
use storage_manager::{disk, emergency_prune, prune_by_age};

pub const TICK: Duration = Duration::from_secs(10);
/// Age-based pruning cadence
const AGE_PRUNE_INTERVAL: Duration = Duration::from_secs(3600);
/// Deferred-delete deletions per tick
const SWEEP_LIMIT: usize = 100;

pub async fn run(config: Arc<Config>, fleet: Arc<Fleet>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First age prune lands on the first tick after startup
    let mut last_age_prune = Instant::now()
        .checked_sub(AGE_PRUNE_INTERVAL)
        .unwrap_or_else(Instant::now);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        tick(&config, &fleet, &mut last_age_prune).await;
    }
}

pub async fn tick(config: &Arc<Config>, fleet: &Arc<Fleet>, last_age_prune: &mut Instant) {
    let base = config.recordings_base_directory.clone();

    // 1. Supervisor liveness: the supervisors notice dead children
    // themselves; the tick just surfaces the aggregate.
    let snapshot = fleet.snapshot();
    let running = snapshot.iter().filter(|s| s.healthy).count();
    for status in snapshot.iter().filter(|s| !s.healthy) {
        tracing::debug!(
            "{}: not recording (state {})",
            status.id,
            status.state.as_str()
        );
    }

    // 2. Emergency prune when the volume is nearly full
    let usage = disk::usage(&base);
    if let Ok(usage) = &usage {
        if usage.used_fraction >= config.storage.emergency_used_fraction {
            tracing::error!(
                "disk at {:.1}% used, emergency prune to {:.1}%",
                usage.used_fraction * 100.0,
                config.storage.emergency_target_fraction * 100.0
            );
            let target = config.storage.emergency_target_fraction;
            let prune_base = base.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                emergency_prune(&prune_base, target)
            })
            .await;
            match outcome {
                Ok(Ok(outcome)) => {
                    let after = disk::usage(&base)
                        .map(|u| u.used_fraction * 100.0)
                        .unwrap_or(f64::NAN);
                    tracing::warn!(
                        "emergency prune removed {} files ({} bytes), disk now {:.1}% used",
                        outcome.removed_count,
                        outcome.freed_bytes,
                        after
                    );
                    if outcome.removed_count == 0 {
                        tracing::error!("emergency prune could not free space");
                    }
                }
                Ok(Err(e)) => tracing::error!("emergency prune failed: {}", e),
                Err(e) => tracing::error!("emergency prune task failed: {}", e),
            }
        }
    }

    // 3. Periodic age-based prune
    if config.storage.cleanup_enabled && last_age_prune.elapsed() >= AGE_PRUNE_INTERVAL {
        *last_age_prune = Instant::now();
        let max_age = Duration::from_secs(config.storage.max_age_days as u64 * 86400);
        let prune_base = base.clone();
        match tokio::task::spawn_blocking(move || prune_by_age(&prune_base, max_age, false)).await
        {
            Ok(Ok(outcome)) if outcome.removed_count > 0 => {
                tracing::info!(
                    "age prune removed {} files ({} bytes)",
                    outcome.removed_count,
                    outcome.freed_bytes
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!("age prune failed: {}", e),
            Err(e) => tracing::error!("age prune task failed: {}", e),
        }
    }

    // 4. Deferred-delete sweep for replaced originals
    let sweep_base = base.clone();
    let _ = tokio::task::spawn_blocking(move || {
        transcode_engine::run_deferred_sweep(&sweep_base, SWEEP_LIMIT)
    })
    .await;

    // 5. One aggregate status line
    let disk_pct = usage
        .map(|u| format!("{:.1}%", u.used_fraction * 100.0))
        .unwrap_or_else(|_| "unknown".to_string());
    tracing::info!(
        "health: {}/{} sources recording, disk {} used",
        running,
        snapshot.len(),
        disk_pct
    );
}

//! Daemon composition and shutdown cascade.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use capture_supervisor::{find_encoder_binary, Fleet};
use config_manager::Config;
use log_ring::{LogRing, RingLayer};
use transcode_engine::spawn_engine;
use web_api::ApiState;

use crate::monitor;

/// Bound on waiting for the engine to wind down at shutdown
const ENGINE_SHUTDOWN_WAIT: Duration = Duration::from_secs(35);

pub fn run(config: Config) -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<()> {
    let ring = LogRing::default();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(RingLayer::new(ring.clone()))
        .init();

    let config = Arc::new(config);
    tracing::info!(
        "starting capture station: {} sources ({} enabled), {}s segments, output {:?}",
        config.sources.len(),
        config.enabled_sources().count(),
        config.segment_duration_seconds,
        config.output_codec
    );

    config
        .check_recordings_dir()
        .context("recordings directory check failed")?;

    // Repair anything a previous crash left mid-swap
    let keep = chrono::Duration::days(config.transcoder.keep_original_days as i64);
    match transcode_engine::reconcile(&config.recordings_base_directory, keep) {
        Ok(report) => {
            if report != Default::default() {
                tracing::warn!(
                    "startup reconciliation: {} temps deleted, {} swaps rolled back, {} markers synthesized, {} orphan markers removed",
                    report.temps_deleted,
                    report.swaps_rolled_back,
                    report.markers_synthesized,
                    report.orphan_markers_deleted
                );
            }
        }
        Err(e) => tracing::error!("startup reconciliation failed: {}", e),
    }

    let shutdown = CancellationToken::new();
    let encoder_binary =
        find_encoder_binary(&config).context("no usable encoder binary")?;
    let fleet = Arc::new(Fleet::new(&config, &encoder_binary, shutdown.clone()));

    let results = fleet.start_all().await;
    let mut started = 0;
    for (id, result) in &results {
        match result {
            Ok(()) => {
                started += 1;
                tracing::info!("{}: started", id);
            }
            Err(e) => tracing::error!("{}: failed to start: {}", id, e),
        }
    }
    if started == 0 {
        tracing::error!("no sources started; staying up for operator control");
    }

    let (transcoder, engine_join) = spawn_engine(config.clone(), shutdown.clone());
    let monitor_join = tokio::spawn(monitor::run(
        config.clone(),
        fleet.clone(),
        shutdown.clone(),
    ));

    let api = Arc::new(ApiState::new(
        config.clone(),
        fleet.clone(),
        transcoder,
        ring.clone(),
    ));
    let server_join = tokio::spawn(web_api::serve(api, shutdown.clone()));

    wait_for_signal().await;
    tracing::info!("shutdown signal received");

    // Cascade: cancel everything, wind down the engine, stop capture, then
    // let the HTTP server drain
    shutdown.cancel();
    if tokio::time::timeout(ENGINE_SHUTDOWN_WAIT, engine_join)
        .await
        .is_err()
    {
        tracing::warn!("transcode engine did not stop within bound");
    }
    fleet.shutdown().await;
    let _ = monitor_join.await;
    match tokio::time::timeout(Duration::from_secs(5), server_join).await {
        Ok(Ok(Ok(()))) | Ok(Ok(Err(_))) | Ok(Err(_)) => {}
        Err(_) => tracing::warn!("http server did not stop within bound"),
    }

    tracing::info!("capture station stopped");
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = ctrl_c.await;
        }
    }
}

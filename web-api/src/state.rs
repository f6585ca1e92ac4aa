use std::sync::Arc;
use std::time::Instant;

use sysinfo::System;
use tokio::sync::Mutex;

use capture_supervisor::Fleet;
use config_manager::Config;
use log_ring::LogRing;
use transcode_engine::TranscoderHandle;

/// Shared state for every route handler.
///
/// Mutating routes go through the fleet (which serializes them); read-only
/// routes use snapshots and never block a mutation.
pub struct ApiState {
    pub config: Arc<Config>,
    pub fleet: Arc<Fleet>,
    pub transcoder: TranscoderHandle,
    pub log_ring: LogRing,
    pub started_at: Instant,
    /// Host sampling for the system endpoints
    pub system: Mutex<System>,
}

impl ApiState {
    pub fn new(
        config: Arc<Config>,
        fleet: Arc<Fleet>,
        transcoder: TranscoderHandle,
        log_ring: LogRing,
    ) -> Self {
        Self {
            config,
            fleet,
            transcoder,
            log_ring,
            started_at: Instant::now(),
            system: Mutex::new(System::new()),
        }
    }
}

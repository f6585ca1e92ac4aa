//! Fleet controller: registry of supervisors plus bulk operations.
//!
//! Mutations (single or fleet-wide) are serialized behind one async mutex;
//! the individual supervisor transitions still run in parallel. Reads come
//! from the supervisors' published snapshots and never take the mutex.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use config_manager::{Config, SourceConfig};

use crate::command::EncoderCommand;
use crate::error::ControlError;
use crate::supervisor::{SupervisorHandle, SupervisorStatus};

/// How long a stop waits for the encoder to flush before killing
pub const DEFAULT_GRACEFUL_DEADLINE: Duration = Duration::from_secs(10);
/// Pause between stop-all and start-all so device handles release
pub const RESTART_SETTLE: Duration = Duration::from_secs(2);

/// Outcome of a bulk restart
#[derive(Debug)]
pub struct RestartReport {
    pub results: BTreeMap<String, Result<(), ControlError>>,
    pub success: bool,
}

pub struct Fleet {
    supervisors: BTreeMap<String, SupervisorHandle>,
    mutation: Mutex<()>,
    graceful_deadline: Duration,
}

impl Fleet {
    /// Build supervisors for every enabled source
    pub fn new(config: &Config, encoder_binary: &str, shutdown: CancellationToken) -> Self {
        Self::with_command_factory(
            config,
            |id, source| EncoderCommand::build(encoder_binary, config, id, source),
            shutdown,
        )
    }

    /// Like [`Fleet::new`] with a custom argv factory (tests use stubs)
    pub fn with_command_factory(
        config: &Config,
        factory: impl Fn(&str, &SourceConfig) -> EncoderCommand,
        shutdown: CancellationToken,
    ) -> Self {
        let mut supervisors = BTreeMap::new();
        for (id, source) in config.enabled_sources() {
            let handle = SupervisorHandle::spawn(
                id.clone(),
                source.clone(),
                factory(id, source),
                config.source_dir(id),
                shutdown.clone(),
            );
            supervisors.insert(id.clone(), handle);
        }
        Self {
            supervisors,
            mutation: Mutex::new(()),
            graceful_deadline: DEFAULT_GRACEFUL_DEADLINE,
        }
    }

    pub fn get(&self, id: &str) -> Option<&SupervisorHandle> {
        self.supervisors.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.supervisors.keys()
    }

    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }

    fn handle(&self, id: &str) -> Result<&SupervisorHandle, ControlError> {
        self.supervisors
            .get(id)
            .ok_or_else(|| ControlError::NotFound(id.to_string()))
    }

    pub async fn start(&self, id: &str) -> Result<(), ControlError> {
        let _guard = self.mutation.lock().await;
        self.handle(id)?.start().await
    }

    pub async fn stop(&self, id: &str) -> Result<(), ControlError> {
        let _guard = self.mutation.lock().await;
        self.handle(id)?.stop(self.graceful_deadline).await
    }

    pub async fn restart(&self, id: &str) -> Result<(), ControlError> {
        let _guard = self.mutation.lock().await;
        self.handle(id)?.restart(self.graceful_deadline).await
    }

    pub async fn start_all(&self) -> BTreeMap<String, Result<(), ControlError>> {
        let _guard = self.mutation.lock().await;
        self.start_all_locked().await
    }

    pub async fn stop_all(&self) -> BTreeMap<String, Result<(), ControlError>> {
        let _guard = self.mutation.lock().await;
        self.stop_all_locked().await
    }

    /// Stop everything, let device handles settle, start everything.
    ///
    /// Not atomic: partial failures are reported per id, never rolled back.
    pub async fn restart_all(&self) -> RestartReport {
        let _guard = self.mutation.lock().await;

        let stopped = self.stop_all_locked().await;
        tokio::time::sleep(RESTART_SETTLE).await;
        let started = self.start_all_locked().await;

        let mut results = BTreeMap::new();
        let mut success = true;
        for (id, stop_result) in stopped {
            let combined = match (stop_result, started.get(&id)) {
                (Ok(()), Some(Ok(()))) => Ok(()),
                (Err(e), _) => Err(e),
                (Ok(()), Some(Err(e))) => Err(e.clone()),
                (Ok(()), None) => Err(ControlError::Unavailable),
            };
            if combined.is_err() {
                success = false;
            }
            results.insert(id, combined);
        }
        RestartReport { results, success }
    }

    async fn start_all_locked(&self) -> BTreeMap<String, Result<(), ControlError>> {
        let futures: Vec<_> = self
            .supervisors
            .iter()
            .map(|(id, handle)| async move { (id.clone(), handle.start().await) })
            .collect();
        join_all(futures).await.into_iter().collect()
    }

    async fn stop_all_locked(&self) -> BTreeMap<String, Result<(), ControlError>> {
        let deadline = self.graceful_deadline;
        let futures: Vec<_> = self
            .supervisors
            .iter()
            .map(|(id, handle)| async move { (id.clone(), handle.stop(deadline).await) })
            .collect();
        join_all(futures).await.into_iter().collect()
    }

    /// Per-supervisor snapshots; consistent per supervisor, not fleet-wide
    pub fn snapshot(&self) -> Vec<SupervisorStatus> {
        self.supervisors.values().map(|h| h.status()).collect()
    }

    pub fn running_count(&self) -> usize {
        self.supervisors.values().filter(|h| h.is_healthy()).count()
    }

    /// Graceful stop of every supervisor, used at process shutdown
    pub async fn shutdown(&self) {
        let results = self.stop_all().await;
        for (id, result) in results {
            match result {
                Ok(()) => tracing::info!("{}: stopped", id),
                Err(e) => tracing::error!("{}: failed to stop cleanly: {}", id, e),
            }
        }
    }
}

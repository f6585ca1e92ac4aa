//! Per-source supervisor task.
//!
//! Owns the state machine {Stopped, Starting, Running, Stopping, Failed}
//! and the encoder child for one source. All mutations arrive through the
//! command channel and are handled one at a time, so operators issuing
//! `stop` immediately followed by `start` observe a restart. Status is
//! published through a watch channel and read without blocking.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use config_manager::SourceConfig;

use crate::backoff::{RestartDecision, RestartPolicy};
use crate::child::{self, ChildHandle, StderrRing};
use crate::command::{ensure_output_dir, EncoderCommand};
use crate::error::ControlError;

/// A child that dies inside this window never reached Running
const LAUNCH_GRACE: Duration = Duration::from_millis(500);
/// Wait after SIGKILL before giving up on the reap
const KILL_WAIT: Duration = Duration::from_secs(5);
/// Output lines included in a status read
const STATUS_TAIL_LINES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Stopped => "stopped",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Failed => "failed",
        }
    }
}

/// Snapshot served to the HTTP layer and CLI
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub id: String,
    pub state: SupervisorState,
    pub pid: Option<u32>,
    pub healthy: bool,
    pub uptime_secs: Option<u64>,
    pub last_exit_code: Option<i32>,
    pub stderr_tail: Vec<String>,
}

/// Internal status cell published through the watch channel
#[derive(Debug, Clone)]
struct StatusCell {
    state: SupervisorState,
    pid: Option<u32>,
    started_at: Option<Instant>,
    last_exit_code: Option<i32>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self {
            state: SupervisorState::Stopped,
            pid: None,
            started_at: None,
            last_exit_code: None,
        }
    }
}

enum Command {
    Start {
        clear_backoff: bool,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    Stop {
        deadline: Duration,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    Restart {
        deadline: Duration,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
}

/// External handle to a supervisor task
pub struct SupervisorHandle {
    pub id: String,
    pub source: SourceConfig,
    tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<StatusCell>,
    ring: StderrRing,
}

impl SupervisorHandle {
    /// Spawn the supervisor task for one source
    pub fn spawn(
        id: String,
        source: SourceConfig,
        cmd: EncoderCommand,
        output_dir: PathBuf,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(StatusCell::default());
        let ring = child::new_ring();

        let task = SupervisorTask {
            id: id.clone(),
            cmd,
            output_dir,
            rx,
            status_tx,
            ring: ring.clone(),
            child: None,
            state: SupervisorState::Stopped,
            policy: RestartPolicy::new(),
            retry_at: None,
            last_exit_code: None,
            shutdown,
        };
        tokio::spawn(task.run());

        Self {
            id,
            source,
            tx,
            status_rx,
            ring,
        }
    }

    pub async fn start(&self) -> Result<(), ControlError> {
        self.send(|reply| Command::Start {
            clear_backoff: true,
            reply,
        })
        .await
    }

    pub async fn stop(&self, deadline: Duration) -> Result<(), ControlError> {
        self.send(|reply| Command::Stop { deadline, reply }).await
    }

    pub async fn restart(&self, deadline: Duration) -> Result<(), ControlError> {
        self.send(|reply| Command::Restart { deadline, reply }).await
    }

    async fn send(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), ControlError>>) -> Command,
    ) -> Result<(), ControlError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| ControlError::Unavailable)?;
        reply_rx.await.map_err(|_| ControlError::Unavailable)?
    }

    /// Pure read; never blocks a mutation
    pub fn status(&self) -> SupervisorStatus {
        let cell = self.status_rx.borrow().clone();
        SupervisorStatus {
            id: self.id.clone(),
            state: cell.state,
            pid: cell.pid,
            healthy: cell.state == SupervisorState::Running,
            uptime_secs: cell.started_at.map(|t| t.elapsed().as_secs()),
            last_exit_code: cell.last_exit_code,
            stderr_tail: child::ring_tail(&self.ring, STATUS_TAIL_LINES),
        }
    }

    /// Running with a live child
    pub fn is_healthy(&self) -> bool {
        self.status_rx.borrow().state == SupervisorState::Running
    }
}

struct SupervisorTask {
    id: String,
    cmd: EncoderCommand,
    output_dir: PathBuf,
    rx: mpsc::Receiver<Command>,
    status_tx: watch::Sender<StatusCell>,
    ring: StderrRing,
    child: Option<ChildHandle>,
    state: SupervisorState,
    policy: RestartPolicy,
    retry_at: Option<Instant>,
    last_exit_code: Option<i32>,
    shutdown: CancellationToken,
}

async fn wait_child(child: &mut Option<ChildHandle>) -> std::io::Result<ExitStatus> {
    match child {
        Some(c) => c.wait().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(t) => tokio::time::sleep_until(tokio::time::Instant::from_std(t)).await,
        None => std::future::pending().await,
    }
}

impl SupervisorTask {
    async fn run(mut self) {
        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            // Handle dropped; reap the child and leave
                            let _ = self.do_stop(Duration::from_secs(2)).await;
                            break;
                        }
                    }
                }
                res = wait_child(&mut self.child), if self.child.is_some() => {
                    self.handle_unexpected_exit(res).await;
                }
                _ = sleep_until_opt(retry_at), if retry_at.is_some() => {
                    self.retry_at = None;
                    if !self.shutdown.is_cancelled() {
                        self.attempt_relaunch().await;
                    }
                }
                _ = self.shutdown.cancelled(), if retry_at.is_some() => {
                    // Crash retries do not execute while shutting down
                    self.retry_at = None;
                }
            }
        }
    }

    fn publish(&self) {
        let _ = self.status_tx.send(StatusCell {
            state: self.state,
            pid: self.child.as_ref().map(|c| c.pid()),
            started_at: self.child.as_ref().map(|c| c.started_at()),
            last_exit_code: self.last_exit_code,
        });
    }

    fn set_state(&mut self, state: SupervisorState) {
        self.state = state;
        self.publish();
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start {
                clear_backoff,
                reply,
            } => {
                let result = self.do_start(clear_backoff).await;
                let _ = reply.send(result);
            }
            Command::Stop { deadline, reply } => {
                let result = self.do_stop(deadline).await;
                let _ = reply.send(result);
            }
            Command::Restart { deadline, reply } => {
                let result = match self.do_stop(deadline).await {
                    Ok(()) => self.do_start(true).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn do_start(&mut self, clear_backoff: bool) -> Result<(), ControlError> {
        match self.state {
            SupervisorState::Running => return Ok(()),
            SupervisorState::Starting | SupervisorState::Stopping => {
                return Err(ControlError::Busy)
            }
            SupervisorState::Stopped | SupervisorState::Failed => {}
        }
        if clear_backoff {
            self.policy.clear();
        }
        self.retry_at = None;
        self.launch()
            .await
            .map_err(|reason| ControlError::LaunchFailed { reason })
    }

    /// Spawn the child and confirm it survives the launch grace window
    async fn launch(&mut self) -> Result<(), String> {
        self.set_state(SupervisorState::Starting);
        tracing::info!("{}: starting encoder", self.id);
        tracing::debug!("{}: {}", self.id, self.cmd.display());

        if let Err(e) = ensure_output_dir(&self.output_dir) {
            self.set_state(SupervisorState::Failed);
            return Err(format!(
                "cannot create {}: {}",
                self.output_dir.display(),
                e
            ));
        }

        let mut child = match ChildHandle::launch(&self.cmd, &self.id, self.ring.clone()) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("{}: launch failed: {}", self.id, e);
                self.set_state(SupervisorState::Failed);
                return Err(e.to_string());
            }
        };

        tokio::time::sleep(LAUNCH_GRACE).await;
        if !child.is_alive() {
            let code = child.exit_status().and_then(|s| s.code());
            self.last_exit_code = code;
            self.set_state(SupervisorState::Failed);
            tracing::error!(
                "{}: encoder exited during startup (code {:?})",
                self.id,
                code
            );
            return Err(format!("encoder exited during startup (code {:?})", code));
        }

        tracing::info!("{}: recording started (pid {})", self.id, child.pid());
        self.child = Some(child);
        self.policy.on_running(Instant::now());
        self.set_state(SupervisorState::Running);
        Ok(())
    }

    async fn do_stop(&mut self, deadline: Duration) -> Result<(), ControlError> {
        match self.state {
            SupervisorState::Stopped => return Ok(()),
            SupervisorState::Starting | SupervisorState::Stopping => {
                return Err(ControlError::Busy)
            }
            SupervisorState::Running | SupervisorState::Failed => {}
        }
        self.retry_at = None;

        if let Some(mut child) = self.child.take() {
            self.set_state(SupervisorState::Stopping);
            tracing::info!("{}: stopping encoder (pid {})", self.id, child.pid());

            if child.is_alive() {
                let _ = child.signal_interrupt();
                match child.wait_deadline(deadline).await {
                    Some(status) => {
                        tracing::info!("{}: encoder stopped cleanly", self.id);
                        self.last_exit_code = status.code();
                    }
                    None => {
                        tracing::warn!(
                            "{}: graceful deadline expired, killing encoder",
                            self.id
                        );
                        child.signal_kill();
                        let _ = child.wait_deadline(KILL_WAIT).await;
                        self.last_exit_code = child.exit_status().and_then(|s| s.code());
                    }
                }
            } else {
                self.last_exit_code = child.exit_status().and_then(|s| s.code());
            }
        }

        self.set_state(SupervisorState::Stopped);
        Ok(())
    }

    async fn handle_unexpected_exit(&mut self, res: std::io::Result<ExitStatus>) {
        let tail = self
            .child
            .take()
            .map(|c| c.output_tail(8))
            .unwrap_or_default();
        let code = res.ok().and_then(|s| s.code());
        self.last_exit_code = code;

        tracing::error!(
            "{}: encoder exited unexpectedly (code {:?})",
            self.id,
            code
        );
        for line in tail {
            tracing::debug!("{}: {}", self.id, line);
        }

        self.set_state(SupervisorState::Failed);
        if self.shutdown.is_cancelled() {
            return;
        }

        match self.policy.on_exit(Instant::now()) {
            RestartDecision::Retry(delay) => {
                tracing::warn!("{}: restarting in {}s", self.id, delay.as_secs());
                self.retry_at = Some(Instant::now() + delay);
            }
            RestartDecision::Pin => {
                tracing::error!(
                    "{}: crash limit reached, staying failed until operator restart",
                    self.id
                );
            }
        }
    }

    async fn attempt_relaunch(&mut self) {
        tracing::info!("{}: automatic restart", self.id);
        if let Err(reason) = self.launch().await {
            tracing::error!("{}: automatic restart failed: {}", self.id, reason);
            // A failed relaunch spends retry budget like any other exit
            match self.policy.on_exit(Instant::now()) {
                RestartDecision::Retry(delay) => {
                    self.retry_at = Some(Instant::now() + delay);
                }
                RestartDecision::Pin => {
                    tracing::error!(
                        "{}: crash limit reached, staying failed until operator restart",
                        self.id
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_source() -> SourceConfig {
        SourceConfig {
            device: "/dev/null".to_string(),
            name: "stub".to_string(),
            resolution: "640x480".parse().unwrap(),
            framerate: 30,
            input_codec: config_manager::InputCodec::H264,
            enabled: true,
        }
    }

    fn spawn_with(program: &str, args: &[&str]) -> (SupervisorHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cmd = EncoderCommand {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        };
        let handle = SupervisorHandle::spawn(
            "cam1".to_string(),
            stub_source(),
            cmd,
            dir.path().join("cam1"),
            CancellationToken::new(),
        );
        (handle, dir)
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (handle, _dir) = spawn_with("sleep", &["30"]);

        handle.start().await.unwrap();
        let status = handle.status();
        assert_eq!(status.state, SupervisorState::Running);
        assert!(status.healthy);
        assert!(status.pid.is_some());

        handle.stop(Duration::from_secs(5)).await.unwrap();
        let status = handle.status();
        assert_eq!(status.state, SupervisorState::Stopped);
        assert!(!status.healthy);
        assert!(status.pid.is_none());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (handle, _dir) = spawn_with("sleep", &["30"]);

        handle.start().await.unwrap();
        let first_pid = handle.status().pid;
        handle.start().await.unwrap();
        assert_eq!(handle.status().pid, first_pid);

        handle.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (handle, _dir) = spawn_with("sleep", &["30"]);

        handle.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(handle.status().state, SupervisorState::Stopped);
        handle.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(handle.status().state, SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_yields_fresh_pid() {
        let (handle, _dir) = spawn_with("sleep", &["30"]);

        handle.start().await.unwrap();
        let first_pid = handle.status().pid.unwrap();

        handle.restart(Duration::from_secs(5)).await.unwrap();
        let status = handle.status();
        assert_eq!(status.state, SupervisorState::Running);
        assert_ne!(status.pid.unwrap(), first_pid);

        handle.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_immediate_death_is_launch_failure() {
        let (handle, _dir) = spawn_with("false", &[]);

        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, ControlError::LaunchFailed { .. }));
        assert_eq!(handle.status().state, SupervisorState::Failed);
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_failure() {
        let (handle, _dir) = spawn_with("/nonexistent/encoder", &[]);

        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, ControlError::LaunchFailed { .. }));
    }

    #[tokio::test]
    async fn test_unexpected_exit_moves_to_failed_then_relaunches() {
        // First run survives the grace window then dies with code 7;
        // every later run sleeps forever.
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("flag");
        let script = format!(
            "if [ -e {flag} ]; then sleep 30; else touch {flag}; sleep 1; exit 7; fi",
            flag = flag.display()
        );
        let (handle, _out) = spawn_with("sh", &["-c", &script]);

        handle.start().await.unwrap();
        let first_pid = handle.status().pid.unwrap();

        // Child exits after ~1s; supervisor records the failure
        tokio::time::sleep(Duration::from_millis(1700)).await;
        let status = handle.status();
        assert_eq!(status.state, SupervisorState::Failed);
        assert_eq!(status.last_exit_code, Some(7));

        // First backoff step is 2s; poll until the relaunch lands
        let deadline = Instant::now() + Duration::from_secs(8);
        loop {
            let status = handle.status();
            if status.state == SupervisorState::Running {
                assert_ne!(status.pid.unwrap(), first_pid);
                break;
            }
            assert!(Instant::now() < deadline, "relaunch never happened");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        handle.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_operator_start_recovers_failed_state() {
        let (handle, _dir) = spawn_with("false", &[]);

        assert!(handle.start().await.is_err());
        assert_eq!(handle.status().state, SupervisorState::Failed);

        // Same broken command, but the operator path is exercised
        assert!(handle.start().await.is_err());
        assert_eq!(handle.status().state, SupervisorState::Failed);
    }
}

//! Encoder child process handle.
//!
//! Owns the OS process plus a bounded ring of its recent output lines.
//! Interrupt first, kill after a deadline: the encoder flushes the current
//! container file on SIGINT and exits cleanly.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::command::EncoderCommand;

/// Lines of child output retained per source
pub const STDERR_RING_CAPACITY: usize = 256;

/// Shared tail of a child's stdout+stderr
pub type StderrRing = Arc<Mutex<VecDeque<String>>>;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("encoder executable not found")]
    ExecutableNotFound,

    #[error("failed to launch encoder: {0}")]
    Io(#[from] std::io::Error),

    #[error("child already exited")]
    AlreadyExited,
}

/// Runtime state of one running encoder child
pub struct ChildHandle {
    child: Child,
    pid: u32,
    started_at: Instant,
    ring: StderrRing,
    exit_status: Option<ExitStatus>,
}

/// Push a line into a ring, evicting the oldest when full
fn ring_push(ring: &StderrRing, line: String) {
    let mut buf = match ring.lock() {
        Ok(buf) => buf,
        Err(poisoned) => poisoned.into_inner(),
    };
    if buf.len() == STDERR_RING_CAPACITY {
        buf.pop_front();
    }
    buf.push_back(line);
}

/// Copy out the last `n` lines of a ring
pub fn ring_tail(ring: &StderrRing, n: usize) -> Vec<String> {
    let buf = match ring.lock() {
        Ok(buf) => buf,
        Err(poisoned) => poisoned.into_inner(),
    };
    let skip = buf.len().saturating_sub(n);
    buf.iter().skip(skip).cloned().collect()
}

impl ChildHandle {
    /// Spawn the encoder and start draining its output into `ring`.
    ///
    /// stdout is captured the same way as stderr; it is normally empty.
    pub fn launch(cmd: &EncoderCommand, source_id: &str, ring: StderrRing) -> Result<Self, LaunchError> {
        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    LaunchError::ExecutableNotFound
                } else {
                    LaunchError::Io(e)
                }
            })?;

        let pid = child.id().ok_or(LaunchError::AlreadyExited)?;

        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, source_id.to_string(), ring.clone());
        }
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, source_id.to_string(), ring.clone());
        }

        Ok(Self {
            child,
            pid,
            started_at: Instant::now(),
            ring,
            exit_status: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Ask the encoder to flush and exit (SIGINT)
    pub fn signal_interrupt(&self) -> Result<(), LaunchError> {
        if self.exit_status.is_some() {
            return Err(LaunchError::AlreadyExited);
        }
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(self.pid as i32), Signal::SIGINT)
            .map_err(|e| LaunchError::Io(std::io::Error::from_raw_os_error(e as i32)))
    }

    /// Force-kill without waiting
    pub fn signal_kill(&mut self) {
        let _ = self.child.start_kill();
    }

    /// Wait for exit; `None` when the deadline passes first
    pub async fn wait_deadline(&mut self, deadline: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(deadline, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.exit_status = Some(status);
                Some(status)
            }
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Wait for exit without a deadline
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Non-blocking liveness check
    pub fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                false
            }
            Err(_) => false,
        }
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Last `n` output lines
    pub fn output_tail(&self, n: usize) -> Vec<String> {
        ring_tail(&self.ring, n)
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        if self.exit_status.is_none() {
            let _ = self.child.start_kill();
        }
    }
}

/// Drain one output pipe line-wise into the ring.
///
/// Error/warning lines are mirrored into the process log, matching the
/// encoder's own severity.
fn spawn_reader(
    pipe: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    source_id: String,
    ring: StderrRing,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let lowered = line.to_lowercase();
            if lowered.contains("error") {
                tracing::error!("{}: {}", source_id, line);
            } else if lowered.contains("warning") {
                tracing::warn!("{}: {}", source_id, line);
            }
            ring_push(&ring, line);
        }
    });
}

pub fn new_ring() -> StderrRing {
    Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_RING_CAPACITY)))
}

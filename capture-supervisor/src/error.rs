use thiserror::Error;

/// Failures surfaced to operators by supervisors and the fleet
#[derive(Debug, Clone, Error)]
pub enum ControlError {
    /// Child never reached Running
    #[error("launch failed: {reason}")]
    LaunchFailed { reason: String },

    /// A transition is already in flight
    #[error("busy: a transition is already in progress")]
    Busy,

    /// Unknown source id
    #[error("unknown source: {0}")]
    NotFound(String),

    /// Supervisor task is gone (process shutting down)
    #[error("supervisor unavailable")]
    Unavailable,
}

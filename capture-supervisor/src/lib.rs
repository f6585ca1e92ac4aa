//! Capture supervision: encoder children, per-source supervisors, fleet.
//!
//! One supervisor task owns each enabled source. It is the only code that
//! touches that source's encoder child; everyone else talks to it through
//! its command channel or reads its published status snapshot. The fleet
//! controller is the registry on top, serializing operator mutations behind
//! a single mutex while individual transitions run in parallel.

pub mod backoff;
pub mod child;
pub mod command;
pub mod error;
pub mod fleet;
pub mod supervisor;

pub use backoff::{RestartDecision, RestartPolicy};
pub use child::{ChildHandle, LaunchError, STDERR_RING_CAPACITY};
pub use command::{find_encoder_binary, EncoderCommand};
pub use error::ControlError;
pub use fleet::{Fleet, RestartReport, DEFAULT_GRACEFUL_DEADLINE, RESTART_SETTLE};
pub use supervisor::{SupervisorHandle, SupervisorState, SupervisorStatus};

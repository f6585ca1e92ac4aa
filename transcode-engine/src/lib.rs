//! Background re-encoder.
//!
//! Opportunistically rewrites aged segments from the bulky capture codec to
//! a smaller one during idle windows. One file at a time, gated on schedule
//! and host load, with an atomic swap and a deferred-delete safety window so
//! a crash at any point leaves either the original or a verified
//! replacement on disk.

pub mod candidates;
pub mod engine;
pub mod error;
pub mod gates;
pub mod probe;
pub mod stats;
pub mod swap;
pub mod verify;

pub use candidates::{find_candidates, ScanCounters};
pub use engine::{run_deferred_sweep, spawn_engine, EngineStatus, Progress, TranscoderHandle};
pub use error::TranscodeError;
pub use gates::GateHeld;
pub use probe::VideoInfo;
pub use stats::TranscodingStats;
pub use swap::{reconcile, ReconcileReport, SweepOutcome, TranscodeMarker};
pub use verify::VerificationFailure;

use thiserror::Error;

use crate::verify::VerificationFailure;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("re-encode child failed: {0}")]
    ChildFailed(String),

    #[error("verification failed: {0}")]
    Verification(#[from] VerificationFailure),

    #[error("cancelled")]
    Cancelled,

    #[error("marker error: {0}")]
    Marker(String),
}

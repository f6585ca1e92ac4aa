use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to get filesystem stats: {0}")]
    StatvfsFailed(String),

    #[error("invalid filesystem")]
    InvalidFilesystem,

    #[error("recordings directory not found: {0}")]
    NotFound(String),
}

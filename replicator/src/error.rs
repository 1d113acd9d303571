use std::error::Error;

use bqsync::error::SyncError;
use thiserror::Error;

pub type ReplicatorResult<T> = Result<T, ReplicatorError>;

/// Errors that stop the replicator process.
#[derive(Debug, Error)]
pub enum ReplicatorError {
    #[error("{0}")]
    Sync(#[from] SyncError),

    #[error("configuration error: {0}")]
    Config(#[source] Box<dyn Error + Send + Sync>),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReplicatorError {
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ReplicatorError::Config(Box::new(err))
    }

    /// Short label used as a log field.
    pub fn category(&self) -> &'static str {
        match self {
            ReplicatorError::Sync(_) => "sync error",
            ReplicatorError::Config(_) => "configuration error",
            ReplicatorError::Io(_) => "i/o error",
        }
    }
}

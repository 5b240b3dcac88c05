//! Error types for the queue store.

use std::io;

use thiserror::Error;

use crate::{JobId, JobStatus};

/// Failure of a queue store operation.
///
/// Enqueue callers see this directly. The dispatcher treats it as a failure of
/// the current job or cycle, never of the process.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O operation failed (file read/write/rename/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The job is not in a state that allows the requested change.
    #[error("Job {id} is {status}, cannot {action}")]
    InvalidTransition {
        id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Queue capacity exceeded: {len}/{capacity} jobs")]
    CapacityExceeded { len: usize, capacity: usize },

    #[error("Queue validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The backend cannot be reached at all.
    #[error("Queue store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// The file decoded, but does not describe the job its name claims.
    #[error("Corrupted job file: {0}")]
    Corrupted(String),
}

/// Problems with the configured queue directory.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Queue path is not a directory: {0}")]
    NotDirectory(String),

    #[error("Queue path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Queue path cannot contain '..' components: {0}")]
    ParentTraversal(String),

    #[error("Queue path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: &'static str, path: String },
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl From<bincode::error::EncodeError> for StorageError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.into())
    }
}

impl From<bincode::error::DecodeError> for StorageError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.into())
    }
}

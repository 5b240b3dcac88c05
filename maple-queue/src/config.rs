use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{FileJobStore, JobStore, MemoryJobStore, Result};

/// Which job store backs the queue.
///
/// File-backed queue in RON config:
/// ```ron
/// Maple (
///     queue: File(
///         path: "/var/spool/maple",
///     ),
/// )
/// ```
///
/// Memory-backed queue (lost on restart) with a capacity limit:
/// ```ron
/// Maple (
///     queue: Memory(
///         capacity: Some(1000),
///     ),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum QueueConfig {
    /// Durable, one file per job.
    File { path: PathBuf },
    /// Volatile, for development and tests.
    Memory {
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::File {
            path: FileJobStore::default().path().to_path_buf(),
        }
    }
}

impl QueueConfig {
    /// Directory of a file-backed queue.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File { path } => Some(path),
            Self::Memory { .. } => None,
        }
    }

    /// Build, and for files initialise, the configured store.
    ///
    /// Meant for the process that delivers from the queue; see
    /// [`FileJobStore::init`].
    ///
    /// # Errors
    /// Returns an error if the path fails validation or initialisation.
    pub fn into_store(self) -> Result<Arc<dyn JobStore>> {
        self.open(FileJobStore::init)
    }

    /// Build the configured store for a process that only enqueues or
    /// inspects jobs while the daemon may be running; see
    /// [`FileJobStore::attach`].
    ///
    /// # Errors
    /// Returns an error if the path fails validation or cannot be opened.
    pub fn attach_store(self) -> Result<Arc<dyn JobStore>> {
        self.open(FileJobStore::attach)
    }

    fn open(self, prepare: fn(&FileJobStore) -> Result<()>) -> Result<Arc<dyn JobStore>> {
        match self {
            Self::File { path } => {
                let store = FileJobStore::builder().path(path).build()?;
                prepare(&store)?;
                Ok(Arc::new(store))
            }
            Self::Memory { capacity } => Ok(capacity.map_or_else(
                || Arc::new(MemoryJobStore::new()) as Arc<dyn JobStore>,
                |capacity| Arc::new(MemoryJobStore::with_capacity(capacity)),
            )),
        }
    }
}

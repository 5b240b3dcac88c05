pub mod backends;
pub mod config;
pub mod error;
pub mod job;
pub mod store;
pub mod types;

pub use backends::{FileJobStore, FileJobStoreBuilder, MemoryJobStore, TestJobStore};
pub use config::QueueConfig;
pub use error::{Result, SerializationError, StorageError, ValidationError};
pub use job::{EmailJob, Failure, NewJob};
pub use store::JobStore;
pub use types::{JobId, JobStatus};

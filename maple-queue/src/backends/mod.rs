mod file;
mod memory;

pub use file::{FileJobStore, FileJobStoreBuilder};
pub use memory::MemoryJobStore;
pub use test::TestJobStore;

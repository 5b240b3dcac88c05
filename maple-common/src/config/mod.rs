//! Configuration shared by the relay client and the daemon.
//!
//! - [`timeouts`]: per-step deadlines for a relay conversation
//! - [`tls`]: how a relay connection is secured

pub mod timeouts;
pub mod tls;

pub use timeouts::RelayTimeouts;
pub use tls::{TlsConfig, TlsPolicy};

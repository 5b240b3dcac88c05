pub mod config;
pub mod logging;

pub use tracing;

/// Lifecycle notifications broadcast to every long-running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop taking new work and exit once the current unit is done.
    Shutdown,
    /// Every component has stopped.
    Finalised,
}

impl Signal {
    /// Whether a task receiving this signal should stop.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Shutdown | Self::Finalised)
    }
}

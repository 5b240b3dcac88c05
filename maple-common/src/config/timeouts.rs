//! Deadlines for each step of a relay conversation.
//!
//! These bound individual commands; the dispatcher additionally bounds the
//! whole attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTimeouts {
    /// TCP connect, plus the TLS handshake for implicit TLS.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// Greeting, EHLO, STARTTLS, AUTH, MAIL FROM and RCPT TO.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::command_secs")]
    pub command_secs: u64,

    /// DATA and the message transfer.
    ///
    /// Default: 120 seconds
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,

    /// QUIT. Expiry never fails an otherwise successful attempt.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::quit_secs")]
    pub quit_secs: u64,
}

impl Default for RelayTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect_secs(),
            command_secs: defaults::command_secs(),
            data_secs: defaults::data_secs(),
            quit_secs: defaults::quit_secs(),
        }
    }
}

impl RelayTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

mod defaults {
    pub const fn connect_secs() -> u64 {
        30
    }
    pub const fn command_secs() -> u64 {
        30
    }
    pub const fn data_secs() -> u64 {
        120
    }
    pub const fn quit_secs() -> u64 {
        10
    }
}

//! Transport security for the outbound relay connection.

use serde::{Deserialize, Serialize};

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Upgrade with STARTTLS and fail the attempt when the relay cannot.
    #[default]
    Required,

    /// Upgrade with STARTTLS when advertised, otherwise stay in plaintext.
    Opportunistic,

    /// Wrap the socket in TLS before the greeting (SMTPS, usually port 465).
    Implicit,

    /// Plaintext only.
    ///
    /// **WARNING**: credentials are sent in the clear. Local relays and tests only.
    Disabled,
}

/// TLS settings for the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub policy: TlsPolicy,

    /// Skip certificate validation.
    ///
    /// **SECURITY WARNING**: this makes the relay connection trivially
    /// interceptable. Only for relays with self-signed certificates in test setups.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl TlsConfig {
    #[must_use]
    pub const fn new(policy: TlsPolicy) -> Self {
        Self {
            policy,
            accept_invalid_certs: false,
        }
    }

    /// Plaintext, as used against local test relays.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(TlsPolicy::Disabled)
    }

    /// Whether a STARTTLS upgrade should be attempted after EHLO.
    #[must_use]
    pub const fn wants_starttls(&self) -> bool {
        matches!(self.policy, TlsPolicy::Required | TlsPolicy::Opportunistic)
    }

    /// Whether a missing STARTTLS capability fails the attempt.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self.policy, TlsPolicy::Required)
    }

    #[must_use]
    pub const fn is_implicit(&self) -> bool {
        matches!(self.policy, TlsPolicy::Implicit)
    }
}

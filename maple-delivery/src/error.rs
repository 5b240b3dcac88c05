//! Error types for delivery and dispatch.
//!
//! [`DeliveryError`] is what a single attempt can fail with. The dispatcher
//! only ever records it against the job, so the variant matters for logging
//! and nothing else. [`DispatchError`] is reserved for failures that stop a
//! whole cycle.

use maple_queue::StorageError;
use maple_smtp::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The relay could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A step, or the whole attempt, ran past its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("TLS failure: {0}")]
    Tls(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The relay answered with an unexpected reply code.
    #[error("Rejected by relay: {code} {message}")]
    Rejected { code: u16, message: String },

    /// Malformed or truncated conversation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The message could not be built.
    #[error("Invalid message: {0}")]
    Message(String),

    /// Anything else, including a panic inside the client.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Short, stable label for structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::Tls(_) => "tls",
            Self::Authentication(_) => "authentication",
            Self::Rejected { .. } => "rejected",
            Self::Protocol(_) => "protocol",
            Self::Message(_) => "message",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<ClientError> for DeliveryError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Io(e) => Self::Connection(e.to_string()),
            ClientError::ConnectionClosed => {
                Self::Connection("Connection closed unexpectedly".to_string())
            }
            ClientError::ParseError(e) => Self::Protocol(e),
            ClientError::Utf8Error(e) => Self::Protocol(e.to_string()),
            ClientError::UnexpectedResponse { code, message, .. } => {
                Self::Rejected { code, message }
            }
            ClientError::AuthenticationFailed { code, message } => {
                Self::Authentication(format!("{code} {message}"))
            }
            ClientError::NoAuthMechanism(offered) => {
                Self::Authentication(format!("No usable mechanism (offered: {offered})"))
            }
            ClientError::TlsError(e) => Self::Tls(e),
            ClientError::BuilderError(e) => Self::Message(e),
        }
    }
}

/// A failure that ends a dispatch cycle early.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Queue store error: {0}")]
    Storage(#[from] StorageError),
}

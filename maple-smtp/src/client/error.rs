//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Network I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The server answered a step with a code other than the expected one.
    #[error("{stage} rejected: {code} {message}")]
    UnexpectedResponse {
        stage: &'static str,
        code: u16,
        message: String,
    },

    #[error("Authentication failed: {code} {message}")]
    AuthenticationFailed { code: u16, message: String },

    /// No mechanism both sides support.
    #[error("No supported AUTH mechanism (server offers: {0})")]
    NoAuthMechanism(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    /// The message could not be assembled.
    #[error("Invalid message: {0}")]
    BuilderError(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// SMTP reply code carried by this error, if the server sent one.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedResponse { code, .. } | Self::AuthenticationFailed { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

//! SMTP submission client used to hand notification mail to a relay.
//!
//! - [`client::SmtpClient`]: plain, STARTTLS and implicit-TLS connections,
//!   AUTH PLAIN/LOGIN and the MAIL/RCPT/DATA transaction
//! - [`message::MessageBuilder`]: RFC 5322 message with a base64 MIME body

pub mod client;
pub mod message;

pub use client::{Capabilities, ClientError, Response, Result, SmtpClient};
pub use message::{BodyKind, MessageBuilder};

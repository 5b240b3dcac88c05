use async_trait::async_trait;
use maple_queue::EmailJob;

use crate::error::DeliveryError;

/// What the dispatcher hands to a [`DeliveryClient`] for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipient: String,
    pub subject: String,
    /// HTML content, before any layout is applied.
    pub body: String,
}

impl From<&EmailJob> for OutboundMessage {
    fn from(job: &EmailJob) -> Self {
        Self {
            recipient: job.recipient.clone(),
            subject: job.subject.clone(),
            body: job.body.clone(),
        }
    }
}

/// One delivery attempt of one message.
///
/// Implementations must not retry internally; the dispatcher owns retries.
#[async_trait]
pub trait DeliveryClient: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Any failure to hand the message over.
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

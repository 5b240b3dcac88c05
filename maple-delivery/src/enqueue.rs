//! Entry point for request handlers.

use std::sync::Arc;

use maple_common::queue;
use maple_queue::{JobId, JobStore, NewJob, StorageError};

use crate::{
    clock::{Clock, SystemClock},
    notification::Notification,
};

/// Cheap to clone; every clone writes to the same store.
#[derive(Debug, Clone)]
pub struct EmailQueue {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl EmailQueue {
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist a pending job and return its id without attempting delivery.
    ///
    /// The recipient is stored as given; validating it is the caller's job.
    ///
    /// # Errors
    /// When the store cannot persist the job.
    pub async fn enqueue(
        &self,
        recipient: impl Into<String> + Send,
        subject: impl Into<String> + Send,
        body: impl Into<String> + Send,
    ) -> Result<JobId, StorageError> {
        let job = NewJob::new(recipient, subject, body, self.clock.now());
        let id = self.store.insert(job).await?;

        queue!(level = DEBUG, job_id = %id, "Email enqueued");
        Ok(id)
    }

    /// Render `notification` and enqueue it for `recipient`.
    ///
    /// # Errors
    /// When the store cannot persist the job.
    pub async fn enqueue_notification(
        &self,
        recipient: impl Into<String> + Send,
        notification: &Notification,
    ) -> Result<JobId, StorageError> {
        self.enqueue(recipient, notification.subject(), notification.body())
            .await
    }
}

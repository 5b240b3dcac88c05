use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus, StorageError};

/// A job as handed to [`JobStore::insert`](crate::JobStore::insert), before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            created_at,
        }
    }

    /// Materialise the persisted form under `id`.
    #[must_use]
    pub fn into_job(self, id: JobId) -> EmailJob {
        EmailJob {
            id,
            recipient: self.recipient,
            subject: self.subject,
            body: self.body,
            status: JobStatus::Pending,
            retry_count: 0,
            created_at: self.created_at,
            sent_at: None,
            next_attempt_at: None,
            last_error: None,
        }
    }
}

/// Outcome of a failed delivery attempt, as recorded against the job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Failure {
    /// Earliest time of the next attempt; `None` keeps the job eligible immediately.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub reason: String,
}

impl Failure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            next_attempt_at: None,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn not_before(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.next_attempt_at = at;
        self
    }
}

/// A unit of queued email work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailJob {
    pub id: JobId,
    pub recipient: String,
    pub subject: String,
    /// May contain HTML.
    pub body: String,
    pub status: JobStatus,
    /// Failed attempts so far. Never decreases.
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    /// Set exactly when `status` becomes `Sent`.
    pub sent_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl EmailJob {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    /// Pending, but every allowed attempt has failed.
    #[must_use]
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.is_pending() && self.retry_count >= max_retries
    }

    /// Whether a dispatch cycle running at `now` may pick this job up.
    #[must_use]
    pub fn is_eligible(&self, max_retries: u32, now: DateTime<Utc>) -> bool {
        self.is_pending()
            && self.retry_count < max_retries
            && self.next_attempt_at.is_none_or(|at| at <= now)
    }

    /// Status as reported to operators: exhausted pending jobs show as `Dead`.
    #[must_use]
    pub fn effective_status(&self, max_retries: u32) -> JobStatus {
        if self.is_exhausted(max_retries) {
            JobStatus::Dead
        } else {
            self.status
        }
    }

    /// Oldest first, ties broken by id.
    #[must_use]
    pub fn selection_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then(self.id.cmp(&other.id))
    }

    /// Transition to `Sent`.
    ///
    /// # Errors
    /// Fails with [`StorageError::InvalidTransition`] unless the job is pending.
    pub fn record_sent(&mut self, sent_at: DateTime<Utc>) -> Result<(), StorageError> {
        self.ensure_pending("mark as sent")?;
        self.status = JobStatus::Sent;
        self.sent_at = Some(sent_at);
        self.next_attempt_at = None;
        Ok(())
    }

    /// Count a failed attempt and return the new retry count.
    ///
    /// # Errors
    /// Fails with [`StorageError::InvalidTransition`] unless the job is pending.
    pub fn record_failure(&mut self, failure: Failure) -> Result<u32, StorageError> {
        self.ensure_pending("record a failure")?;
        self.retry_count = self.retry_count.saturating_add(1);
        self.next_attempt_at = failure.next_attempt_at;
        self.last_error = Some(failure.reason);
        Ok(self.retry_count)
    }

    fn ensure_pending(&self, action: &'static str) -> Result<(), StorageError> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(StorageError::InvalidTransition {
                id: self.id,
                status: self.status,
                action,
            })
        }
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{EmailJob, Failure, JobId, JobStatus, NewJob, Result};

/// Durable storage for email jobs.
///
/// Every mutation is atomic with respect to a single job, and callers may
/// invoke any method concurrently. Only pending jobs can transition; `Sent` is
/// terminal.
///
/// A single dispatcher is assumed. Running several would need a claim step
/// between [`select_eligible`](Self::select_eligible) and delivery (for
/// example a lease timestamp written under the store's lock) so that two
/// workers never attempt the same job.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug {
    /// Persist a new pending job and return its id.
    ///
    /// The job is durable once this returns.
    async fn insert(&self, job: NewJob) -> Result<JobId>;

    /// Up to `limit` pending jobs with `retry_count < max_retries` whose
    /// `next_attempt_at` has passed, oldest first.
    async fn select_eligible(
        &self,
        limit: usize,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<EmailJob>>;

    async fn mark_sent(&self, id: JobId, sent_at: DateTime<Utc>) -> Result<()>;

    /// Record a failed attempt and return the job's new retry count.
    async fn mark_failed(&self, id: JobId, failure: Failure) -> Result<u32>;

    async fn get(&self, id: JobId) -> Result<EmailJob>;

    /// All jobs, optionally restricted to a persisted status, in id order.
    ///
    /// Filtering on [`JobStatus::Dead`] always yields nothing here, since that
    /// state is derived from the retry ceiling rather than stored.
    async fn list(&self, status: Option<JobStatus>) -> Result<Vec<EmailJob>>;

    /// Remove a job permanently. Used by retention and operator tooling only.
    async fn delete(&self, id: JobId) -> Result<()>;
}

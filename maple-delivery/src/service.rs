//! Read-only view of the queue for operators and request handlers.
//!
//! Unlike the store, statuses here are effective: a pending job that has used
//! up its retries is reported as [`JobStatus::Dead`].

use std::sync::Arc;

use async_trait::async_trait;
use maple_queue::{EmailJob, JobId, JobStatus, JobStore, StorageError};

/// Job counts by effective status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub pending: usize,
    pub sent: usize,
    pub dead: usize,
}

impl QueueSummary {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.sent + self.dead
    }
}

/// A job together with the status operators should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobView {
    pub job: EmailJob,
    pub status: JobStatus,
}

#[async_trait]
pub trait JobQueryService: Send + Sync {
    /// # Errors
    /// [`StorageError::NotFound`] if no such job exists.
    async fn job(&self, id: JobId) -> Result<JobView, StorageError>;

    /// Jobs with the given effective status, or all of them, by id.
    ///
    /// # Errors
    /// When the store cannot be read.
    async fn jobs(&self, status: Option<JobStatus>) -> Result<Vec<JobView>, StorageError>;

    /// # Errors
    /// When the store cannot be read.
    async fn summary(&self) -> Result<QueueSummary, StorageError>;
}

#[derive(Debug, Clone)]
pub struct JobQuery {
    store: Arc<dyn JobStore>,
    max_retries: u32,
}

impl JobQuery {
    /// `max_retries` must match the dispatcher's for `Dead` to be accurate.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    fn view(&self, job: EmailJob) -> JobView {
        JobView {
            status: job.effective_status(self.max_retries),
            job,
        }
    }
}

#[async_trait]
impl JobQueryService for JobQuery {
    async fn job(&self, id: JobId) -> Result<JobView, StorageError> {
        Ok(self.view(self.store.get(id).await?))
    }

    async fn jobs(&self, status: Option<JobStatus>) -> Result<Vec<JobView>, StorageError> {
        // Dead is never persisted; it lives among the pending jobs.
        let persisted = match status {
            Some(JobStatus::Dead) => Some(JobStatus::Pending),
            other => other,
        };

        let mut views: Vec<JobView> = self
            .store
            .list(persisted)
            .await?
            .into_iter()
            .map(|job| self.view(job))
            .filter(|view| status.is_none_or(|s| view.status == s))
            .collect();
        views.sort_by_key(|view| view.job.id);

        Ok(views)
    }

    async fn summary(&self) -> Result<QueueSummary, StorageError> {
        let mut summary = QueueSummary::default();
        for view in self.jobs(None).await? {
            match view.status {
                JobStatus::Pending => summary.pending += 1,
                JobStatus::Sent => summary.sent += 1,
                JobStatus::Dead => summary.dead += 1,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use maple_queue::{Failure, MemoryJobStore, NewJob};
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn exhausted_jobs_are_reported_dead() {
        let store = Arc::new(MemoryJobStore::new());
        let query = JobQuery::new(store.clone(), 2);

        let new = || NewJob::new("a@example.com", "s", "b", Utc::now());
        let pending = store.insert(new()).await.unwrap();
        let sent = store.insert(new()).await.unwrap();
        let dead = store.insert(new()).await.unwrap();

        store.mark_sent(sent, Utc::now()).await.unwrap();
        store.mark_failed(pending, Failure::new("x")).await.unwrap();
        for _ in 0..2 {
            store.mark_failed(dead, Failure::new("x")).await.unwrap();
        }

        assert_eq!(query.job(dead).await.unwrap().status, JobStatus::Dead);
        assert_eq!(query.job(dead).await.unwrap().job.status, JobStatus::Pending);

        let ids = |views: Vec<JobView>| views.into_iter().map(|v| v.job.id).collect::<Vec<_>>();
        assert_eq!(ids(query.jobs(Some(JobStatus::Dead)).await.unwrap()), vec![dead]);
        assert_eq!(ids(query.jobs(Some(JobStatus::Pending)).await.unwrap()), vec![pending]);
        assert_eq!(ids(query.jobs(None).await.unwrap()), vec![pending, sent, dead]);

        assert_eq!(
            query.summary().await.unwrap(),
            QueueSummary {
                pending: 1,
                sent: 1,
                dead: 1,
            }
        );
    }

    #[tokio::test]
    async fn missing_job() {
        let query = JobQuery::new(Arc::new(MemoryJobStore::new()), 3);
        assert!(matches!(
            query.job(JobId::new(42)).await,
            Err(StorageError::NotFound(_))
        ));
    }
}

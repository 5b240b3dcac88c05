use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{EmailJob, Failure, JobId, JobStatus, JobStore, NewJob, Result, StorageError};

/// In-memory job store.
///
/// Jobs live in an ordered map behind a `parking_lot::RwLock`, so nothing
/// survives a restart. Intended for tests and development setups.
///
/// # Capacity Management
/// An optional capacity turns unbounded growth into
/// [`StorageError::CapacityExceeded`] on insert. Sent jobs count towards it
/// until deleted.
#[derive(Debug, Clone)]
pub struct MemoryJobStore {
    pub(crate) jobs: Arc<RwLock<BTreeMap<JobId, EmailJob>>>,
    next_id: Arc<AtomicU64>,
    capacity: Option<usize>,
}

impl MemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            capacity: None,
        }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn with_job<T>(
        &self,
        id: JobId,
        change: impl FnOnce(&mut EmailJob) -> Result<T>,
    ) -> Result<T> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(StorageError::NotFound(id))?;

        // Apply to a copy so a rejected transition leaves the stored job untouched.
        let mut updated = job.clone();
        let out = change(&mut updated)?;
        *job = updated;
        Ok(out)
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: NewJob) -> Result<JobId> {
        let mut jobs = self.jobs.write();

        if let Some(capacity) = self.capacity
            && jobs.len() >= capacity
        {
            return Err(StorageError::CapacityExceeded {
                len: jobs.len(),
                capacity,
            });
        }

        let id = JobId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        jobs.insert(id, job.into_job(id));

        Ok(id)
    }

    async fn select_eligible(
        &self,
        limit: usize,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<EmailJob>> {
        let mut eligible: Vec<EmailJob> = self
            .jobs
            .read()
            .values()
            .filter(|job| job.is_eligible(max_retries, now))
            .cloned()
            .collect();

        eligible.sort_by(EmailJob::selection_order);
        eligible.truncate(limit);

        Ok(eligible)
    }

    async fn mark_sent(&self, id: JobId, sent_at: DateTime<Utc>) -> Result<()> {
        self.with_job(id, |job| job.record_sent(sent_at))
    }

    async fn mark_failed(&self, id: JobId, failure: Failure) -> Result<u32> {
        self.with_job(id, |job| job.record_failure(failure))
    }

    async fn get(&self, id: JobId) -> Result<EmailJob> {
        self.jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    async fn list(&self, status: Option<JobStatus>) -> Result<Vec<EmailJob>> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|job| status.is_none_or(|s| job.status == s))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: JobId) -> Result<()> {
        self.jobs
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::NotFound(id))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    use super::*;

    fn new_job(n: usize, created_at: DateTime<Utc>) -> NewJob {
        NewJob::new(
            format!("user{n}@example.com"),
            format!("Subject {n}"),
            format!("<p>Body {n}</p>"),
            created_at,
        )
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn basic_lifecycle() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let id = store.insert(new_job(1, now)).await.expect("insert");
        let job = store.get(id).await.expect("get");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);

        let count = store
            .mark_failed(id, Failure::new("refused"))
            .await
            .expect("mark failed");
        assert_eq!(count, 1);

        store.mark_sent(id, now).await.expect("mark sent");
        let job = store.get(id).await.expect("get");
        assert_eq!(job.status, JobStatus::Sent);
        assert_eq!(job.sent_at, Some(now));
        assert_eq!(job.retry_count, 1);

        assert!(matches!(
            store.mark_failed(id, Failure::new("late")).await,
            Err(StorageError::InvalidTransition { .. })
        ));
        assert_eq!(store.get(id).await.expect("get").retry_count, 1);

        store.delete(id).await.expect("delete");
        assert!(matches!(
            store.get(id).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn capacity_limit() {
        let store = MemoryJobStore::with_capacity(2);
        let now = Utc::now();

        store.insert(new_job(1, now)).await.expect("first insert");
        let second = store.insert(new_job(2, now)).await.expect("second insert");

        let result = store.insert(new_job(3, now)).await;
        assert!(matches!(
            result,
            Err(StorageError::CapacityExceeded {
                len: 2,
                capacity: 2
            })
        ));

        store.delete(second).await.expect("delete");
        assert!(store.insert(new_job(3, now)).await.is_ok());
        assert_eq!(store.capacity(), Some(2));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn concurrent_inserts_get_distinct_ids() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let mut handles = vec![];
        for i in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.insert(new_job(i, now)).await },
            ));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            let id = handle.await.expect("task panicked").expect("insert failed");
            assert!(ids.insert(id), "duplicate id {id}");
        }
        assert_eq!(store.len(), 100);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn selection_is_oldest_first_and_bounded() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        // Inserted newest first so that id order and age order disagree.
        for n in 0..5_i64 {
            store
                .insert(new_job(
                    usize::try_from(n).expect("small"),
                    now - TimeDelta::seconds(n),
                ))
                .await
                .expect("insert");
        }

        let selected = store.select_eligible(3, 3, now).await.expect("select");
        let recipients: Vec<&str> = selected.iter().map(|j| j.recipient.as_str()).collect();
        assert_eq!(
            recipients,
            vec!["user4@example.com", "user3@example.com", "user2@example.com"]
        );
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn exhausted_and_sent_jobs_are_not_selected() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let sent = store.insert(new_job(1, now)).await.expect("insert");
        let exhausted = store.insert(new_job(2, now)).await.expect("insert");
        let fresh = store.insert(new_job(3, now)).await.expect("insert");

        store.mark_sent(sent, now).await.expect("mark sent");
        for _ in 0..3 {
            store
                .mark_failed(exhausted, Failure::new("refused"))
                .await
                .expect("mark failed");
        }

        let selected = store.select_eligible(10, 3, now).await.expect("select");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, fresh);

        let pending = store
            .list(Some(JobStatus::Pending))
            .await
            .expect("list");
        assert_eq!(pending.len(), 2);
        assert!(store.list(Some(JobStatus::Dead)).await.expect("list").is_empty());
    }
}

//! Optional removal of jobs that will never be attempted again.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use maple_common::internal;
use maple_queue::{JobStatus, JobStore, StorageError};
use serde::{Deserialize, Serialize};

/// Jobs are kept forever unless a threshold is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Remove sent jobs this long after `sent_at`.
    #[serde(default)]
    pub sent_after_secs: Option<u64>,

    /// Remove exhausted jobs this long after `created_at`.
    #[serde(default)]
    pub dead_after_secs: Option<u64>,

    /// How often the dispatcher purges, when any threshold is set.
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "defaults::interval_secs")]
    pub interval_secs: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            sent_after_secs: None,
            dead_after_secs: None,
            interval_secs: defaults::interval_secs(),
        }
    }
}

impl RetentionPolicy {
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.sent_after_secs.is_some() || self.dead_after_secs.is_some()
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn cutoff(now: DateTime<Utc>, after_secs: Option<u64>) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(after_secs?).ok()?;
    now.checked_sub_signed(TimeDelta::try_seconds(secs)?)
}

/// Delete every job past its retention threshold and return how many went.
///
/// # Errors
/// Fails on the first store error; jobs deleted before it stay deleted.
pub async fn purge_expired(
    store: &dyn JobStore,
    policy: &RetentionPolicy,
    max_retries: u32,
    now: DateTime<Utc>,
) -> Result<usize, StorageError> {
    let sent_cutoff = cutoff(now, policy.sent_after_secs);
    let dead_cutoff = cutoff(now, policy.dead_after_secs);
    let mut purged = 0;

    if let Some(cutoff) = sent_cutoff {
        for job in store.list(Some(JobStatus::Sent)).await? {
            if job.sent_at.is_some_and(|at| at < cutoff) {
                store.delete(job.id).await?;
                purged += 1;
            }
        }
    }

    if let Some(cutoff) = dead_cutoff {
        for job in store.list(Some(JobStatus::Pending)).await? {
            if job.is_exhausted(max_retries) && job.created_at < cutoff {
                store.delete(job.id).await?;
                purged += 1;
            }
        }
    }

    if purged > 0 {
        internal!(level = INFO, purged, "Purged expired jobs");
    }

    Ok(purged)
}

mod defaults {
    pub const fn interval_secs() -> u64 {
        3600
    }
}

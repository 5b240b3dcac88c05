//! A single dispatch cycle.

use std::{any::Any, panic::AssertUnwindSafe};

use futures_util::FutureExt;
use maple_common::{Signal, internal};
use maple_queue::{EmailJob, Failure, JobId};
use tokio::sync::broadcast::{self, error::TryRecvError};

use super::Dispatcher;
use crate::{
    client::OutboundMessage,
    error::{DeliveryError, DispatchError},
};

/// What happened to one job in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Sent,
    /// Failed, and will be attempted again.
    Failed { retry_count: u32 },
    /// Failed for the last allowed time.
    Exhausted { retry_count: u32 },
    /// The attempt finished but its result could not be recorded.
    StorageFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Jobs returned by selection.
    pub selected: usize,
    pub outcomes: Vec<(JobId, JobOutcome)>,
    /// Selected jobs left untouched because of a shutdown.
    pub skipped: usize,
    pub interrupted: bool,
}

impl CycleReport {
    fn count(&self, predicate: impl Fn(&JobOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }

    #[must_use]
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn sent(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Sent))
    }

    /// Failed attempts that leave the job retryable.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Failed { .. }))
    }

    #[must_use]
    pub fn exhausted(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Exhausted { .. }))
    }

    #[must_use]
    pub fn storage_errors(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::StorageFailed))
    }

    #[must_use]
    pub fn outcome(&self, id: JobId) -> Option<JobOutcome> {
        self.outcomes
            .iter()
            .find(|(job, _)| *job == id)
            .map(|(_, outcome)| *outcome)
    }
}

/// Whether a terminal signal is waiting, without blocking.
fn shutdown_requested(rx: &mut broadcast::Receiver<Signal>) -> bool {
    loop {
        match rx.try_recv() {
            Ok(signal) if signal.is_terminal() => return true,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => return false,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

impl Dispatcher {
    /// Select one batch and attempt each job in it.
    ///
    /// When `shutdown` is given it is checked between jobs; a terminal signal
    /// leaves the rest of the batch for a later run and marks the report
    /// interrupted.
    ///
    /// # Errors
    /// Only when selection fails. Failures while recording an individual
    /// outcome are logged, counted and reported as [`JobOutcome::StorageFailed`].
    pub async fn run_cycle(
        &self,
        mut shutdown: Option<&mut broadcast::Receiver<Signal>>,
    ) -> Result<CycleReport, DispatchError> {
        self.stats.record_cycle();

        let jobs = self
            .store
            .select_eligible(
                self.config.batch_size,
                self.config.retry.max_retries,
                self.clock.now(),
            )
            .await
            .inspect_err(|_| self.stats.record_storage_error())?;

        let mut report = CycleReport {
            selected: jobs.len(),
            ..CycleReport::default()
        };

        if jobs.is_empty() {
            internal!("No eligible jobs");
            return Ok(report);
        }

        for (index, job) in jobs.iter().enumerate() {
            if let Some(rx) = shutdown.as_deref_mut()
                && shutdown_requested(rx)
            {
                report.interrupted = true;
                report.skipped = jobs.len() - index;
                internal!(
                    level = INFO,
                    skipped = report.skipped,
                    "Shutdown requested, leaving the rest of the batch pending"
                );
                break;
            }

            let outcome = self.process_job(job).await;
            report.outcomes.push((job.id, outcome));
        }

        internal!(
            level = DEBUG,
            selected = report.selected,
            sent = report.sent(),
            failed = report.failed(),
            exhausted = report.exhausted(),
            storage_errors = report.storage_errors(),
            "Dispatch cycle complete"
        );

        Ok(report)
    }

    async fn attempt(&self, job: &EmailJob) -> Result<(), DeliveryError> {
        let message = OutboundMessage::from(job);
        let limit = self.config.attempt_timeout();

        let delivery = AssertUnwindSafe(self.client.deliver(&message)).catch_unwind();

        match tokio::time::timeout(limit, delivery).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(DeliveryError::Internal(format!(
                "Delivery client panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(DeliveryError::Timeout(format!(
                "Attempt exceeded {limit:?}"
            ))),
        }
    }

    async fn process_job(&self, job: &EmailJob) -> JobOutcome {
        let attempt = job.retry_count + 1;
        internal!(
            job_id = %job.id,
            attempt,
            recipient = %job.recipient,
            "Attempting delivery"
        );

        match self.attempt(job).await {
            Ok(()) => self.record_sent(job, attempt).await,
            Err(error) => self.record_failure(job, attempt, &error).await,
        }
    }

    async fn record_sent(&self, job: &EmailJob, attempt: u32) -> JobOutcome {
        match self.store.mark_sent(job.id, self.clock.now()).await {
            Ok(()) => {
                self.stats.record_sent();
                internal!(level = INFO, job_id = %job.id, attempt, "Email delivered");
                JobOutcome::Sent
            }
            Err(e) => {
                self.stats.record_storage_error();
                tracing::error!(
                    job_id = %job.id,
                    error = %e,
                    "Email delivered but the result could not be recorded"
                );
                JobOutcome::StorageFailed
            }
        }
    }

    async fn record_failure(
        &self,
        job: &EmailJob,
        attempt: u32,
        error: &DeliveryError,
    ) -> JobOutcome {
        let retry = &self.config.retry;
        let failure = Failure::new(error.to_string())
            .not_before(retry.next_attempt_at(attempt, self.clock.now()));

        let retry_count = match self.store.mark_failed(job.id, failure).await {
            Ok(count) => count,
            Err(e) => {
                self.stats.record_storage_error();
                tracing::error!(
                    job_id = %job.id,
                    error = %e,
                    delivery_error = %error,
                    "Failed to record delivery failure"
                );
                return JobOutcome::StorageFailed;
            }
        };

        let exhausted = retry.is_exhausted(retry_count);
        self.stats.record_failed(exhausted);

        if exhausted {
            internal!(
                level = WARN,
                job_id = %job.id,
                retry_count,
                kind = error.kind(),
                error = %error,
                "RetryExhausted: giving up on job after {retry_count} failed attempts"
            );
            JobOutcome::Exhausted { retry_count }
        } else {
            internal!(
                level = WARN,
                job_id = %job.id,
                retry_count,
                kind = error.kind(),
                error = %error,
                "Delivery failed, will retry"
            );
            JobOutcome::Failed { retry_count }
        }
    }
}

//! Background worker that drains the queue.
//!
//! Each cycle selects a bounded batch of eligible jobs and attempts them one
//! at a time. Per-job failures are recorded against the job and never end the
//! cycle; only a failure to select does.

mod process;

use std::{sync::Arc, time::Duration};

use maple_common::{Signal, internal};
use maple_queue::JobStore;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::Instant,
};

pub use process::{CycleReport, JobOutcome};

use crate::{
    client::DeliveryClient,
    clock::{Clock, SystemClock},
    retention::{RetentionPolicy, purge_expired},
    retry::RetryPolicy,
    stats::DispatchStats,
    ticker::Ticker,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Time between cycles (in seconds).
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::interval_secs")]
    pub interval_secs: u64,

    /// Maximum number of jobs attempted per cycle.
    ///
    /// Default: 10
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Upper bound for a single delivery attempt (in seconds). Expiry counts
    /// as a failed attempt.
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    #[serde(default)]
    pub retention: RetentionPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval_secs(),
            batch_size: defaults::batch_size(),
            retry: RetryPolicy::default(),
            attempt_timeout_secs: defaults::attempt_timeout_secs(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<dyn JobStore>,
    client: Arc<dyn DeliveryClient>,
    clock: Arc<dyn Clock>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn JobStore>,
        client: Arc<dyn DeliveryClient>,
    ) -> Self {
        Self {
            config,
            store,
            client,
            clock: Arc::new(SystemClock),
            stats: Arc::default(),
        }
    }

    /// Use `clock` for selection and for the timestamps written to jobs.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Shared handle to the running totals.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Run cycles whenever `ticker` fires until a shutdown signal arrives.
    ///
    /// A shutdown received during a cycle lets the current job finish and
    /// leaves the rest of the batch pending. Cycle failures are logged and the
    /// loop waits for the next tick.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(
        &self,
        mut ticker: impl Ticker,
        mut shutdown: broadcast::Receiver<Signal>,
    ) {
        internal!(
            level = INFO,
            interval_secs = self.config.interval_secs,
            batch_size = self.config.batch_size,
            max_retries = self.config.retry.max_retries,
            "Dispatcher starting"
        );

        let mut last_purge = None;

        loop {
            tokio::select! {
                biased;

                signal = shutdown.recv() => {
                    if should_stop(signal) {
                        break;
                    }
                }

                () = ticker.tick() => {
                    match self.run_cycle(Some(&mut shutdown)).await {
                        Ok(report) if report.interrupted => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Dispatch cycle failed, retrying next interval");
                        }
                    }

                    self.purge_if_due(&mut last_purge).await;
                }
            }
        }

        internal!(level = INFO, stats = ?self.stats.snapshot(), "Dispatcher stopped");
    }

    async fn purge_if_due(&self, last_purge: &mut Option<Instant>) {
        let policy = &self.config.retention;
        if !policy.is_enabled()
            || last_purge.is_some_and(|at: Instant| at.elapsed() < policy.interval())
        {
            return;
        }
        *last_purge = Some(Instant::now());

        match purge_expired(
            self.store.as_ref(),
            policy,
            self.config.retry.max_retries,
            self.clock.now(),
        )
        .await
        {
            Ok(purged) => self.stats.record_purged(purged),
            Err(e) => {
                self.stats.record_storage_error();
                tracing::error!(error = %e, "Retention purge failed");
            }
        }
    }
}

/// Whether `serve` should stop after receiving `signal`. A lagged receiver
/// only missed signals; the next `recv` returns the oldest one still held.
fn should_stop(signal: Result<Signal, RecvError>) -> bool {
    match signal {
        Ok(signal) if signal.is_terminal() => {
            internal!("Dispatcher received shutdown signal");
            true
        }
        Ok(_) => false,
        Err(RecvError::Lagged(missed)) => {
            internal!(level = WARN, missed, "Dispatcher fell behind on control signals");
            false
        }
        Err(RecvError::Closed) => {
            tracing::error!("Dispatcher shutdown channel closed");
            true
        }
    }
}

mod defaults {
    pub const fn interval_secs() -> u64 {
        10
    }

    pub const fn batch_size() -> usize {
        10
    }

    pub const fn attempt_timeout_secs() -> u64 {
        60
    }
}

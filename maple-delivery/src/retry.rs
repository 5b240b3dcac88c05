//! Retry ceiling and optional backoff between attempts.

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts after which a job is no longer selected.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Base delay before a failed job becomes eligible again (in seconds).
    ///
    /// The delay after the n-th failure is `base * 2^(n - 1)`, capped at
    /// `max_retry_delay_secs`. Zero retries on the next cycle.
    ///
    /// Default: 0
    #[serde(default = "defaults::base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    /// Upper bound for the backoff delay (in seconds).
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "defaults::max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Randomises the delay within ±`retry_jitter_factor`.
    ///
    /// Default: 0.0
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            base_retry_delay_secs: defaults::base_retry_delay_secs(),
            max_retry_delay_secs: defaults::max_retry_delay_secs(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Whether `retry_count` failures use up every allowed attempt.
    #[must_use]
    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Earliest time a job that has just failed for the `attempt`-th time
    /// may be tried again. `None` means "next cycle".
    #[must_use]
    pub fn next_attempt_at(&self, attempt: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.base_retry_delay_secs == 0 {
            return None;
        }

        let exponent = attempt.saturating_sub(1).min(63);
        let delay = self
            .base_retry_delay_secs
            .saturating_mul(1u64 << exponent)
            .min(self.max_retry_delay_secs);

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "Delays are bounded by max_retry_delay_secs, far below f64 precision limits"
        )]
        let delay = if self.retry_jitter_factor > 0.0 {
            let jitter = self.retry_jitter_factor.min(1.0);
            let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
            (delay as f64 * factor).round() as u64
        } else {
            delay
        };

        let delay = TimeDelta::try_seconds(i64::try_from(delay).ok()?)?;
        now.checked_add_signed(delay)
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        3
    }

    pub const fn base_retry_delay_secs() -> u64 {
        0
    }

    pub const fn max_retry_delay_secs() -> u64 {
        3600
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.0
    }
}

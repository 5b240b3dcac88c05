use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals kept by the dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    cycles: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    exhausted: AtomicU64,
    storage_errors: AtomicU64,
    purged: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub sent: u64,
    /// Failed attempts, including those that exhausted a job.
    pub failed: u64,
    pub exhausted: u64,
    pub storage_errors: u64,
    pub purged: u64,
}

impl DispatchStats {
    pub(crate) fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, exhausted: bool) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if exhausted {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_purged(&self, count: usize) {
        self.purged
            .fetch_add(u64::try_from(count).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_failures_count_twice() {
        let stats = DispatchStats::default();
        stats.record_cycle();
        stats.record_sent();
        stats.record_failed(false);
        stats.record_failed(true);
        stats.record_purged(4);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                cycles: 1,
                sent: 1,
                failed: 2,
                exhausted: 1,
                storage_errors: 0,
                purged: 4,
            }
        );
    }
}

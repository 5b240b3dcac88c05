//! What paces the dispatcher: a real interval, or ticks sent by a test.

use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    sync::mpsc,
    time::{Interval, MissedTickBehavior},
};

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[async_trait]
pub trait Ticker: Send {
    /// Resolve when the next cycle is due.
    async fn tick(&mut self);
}

/// Fixed period. The first tick completes immediately.
#[derive(Debug)]
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        // tokio rejects a zero period.
        let mut interval = tokio::time::interval(period.max(MIN_PERIOD));
        // A slow cycle delays the next one instead of causing a burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Ticks on demand through a [`TickHandle`].
///
/// Once every handle is dropped the ticker never fires again.
#[derive(Debug)]
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

#[derive(Debug, Clone)]
pub struct TickHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTicker {
    #[must_use]
    pub fn new() -> (Self, TickHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, TickHandle { tx })
    }
}

impl TickHandle {
    /// Request one cycle. Returns `false` if the ticker is gone.
    pub fn tick(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

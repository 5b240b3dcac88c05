//! Asynchronous delivery of queued notification mail.
//!
//! - [`EmailQueue`] persists jobs for request handlers and returns at once
//! - [`Dispatcher`] drains the queue in the background, retrying failures up
//!   to a ceiling
//! - [`RelayClient`] hands each message to the configured SMTP relay
//! - [`JobQuery`] reports job status, including exhausted jobs as dead

mod client;
mod clock;
mod dispatcher;
mod enqueue;
mod error;
mod notification;
mod relay;
pub mod retention;
mod retry;
mod service;
mod stats;
mod template;
mod ticker;

pub use client::{DeliveryClient, OutboundMessage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{CycleReport, Dispatcher, DispatcherConfig, JobOutcome};
pub use enqueue::EmailQueue;
pub use error::{DeliveryError, DispatchError};
pub use notification::{Notification, ServerDetails};
pub use relay::{Credentials, RelayClient, RelayConfig};
pub use retention::RetentionPolicy;
pub use retry::RetryPolicy;
pub use service::{JobQuery, JobQueryService, JobView, QueueSummary};
pub use stats::{DispatchStats, StatsSnapshot};
pub use template::{HtmlLayout, escape_html};
pub use ticker::{IntervalTicker, ManualTicker, TickHandle, Ticker};

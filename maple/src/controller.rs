use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use maple_common::{Signal, internal, logging};
use maple_delivery::{Dispatcher, DispatcherConfig, IntervalTicker, RelayClient, RelayConfig};
use maple_queue::QueueConfig;
use serde::Deserialize;
use tokio::sync::broadcast;

/// How long the dispatcher may take to finish its current job after a
/// shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Top-level configuration, read from `maple.config.ron`.
#[derive(Debug, Default, Deserialize)]
pub struct Maple {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown_requested() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

impl Maple {
    /// Parse a RON configuration document.
    ///
    /// # Errors
    /// When the document is not valid RON or does not match the layout.
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// Open the queue, start the dispatcher and run until SIGINT or SIGTERM.
    ///
    /// # Errors
    /// When the queue cannot be opened, the signal handlers cannot be
    /// installed, or the dispatcher task fails.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let store = self.queue.into_store()?;
        let client = Arc::new(RelayClient::new(self.relay));
        let dispatcher = Dispatcher::new(self.dispatcher, store, client);
        let ticker = IntervalTicker::new(dispatcher.config().interval());

        internal!(level = INFO, "Controller running");

        let receiver = SHUTDOWN_BROADCAST.subscribe();
        let mut serving = tokio::spawn(async move { dispatcher.serve(ticker, receiver).await });

        tokio::select! {
            joined = &mut serving => {
                joined?;
                anyhow::bail!("Dispatcher stopped without a shutdown signal");
            }
            requested = shutdown_requested() => requested?,
        }

        internal!(level = INFO, "Shutting down...");
        SHUTDOWN_BROADCAST
            .send(Signal::Shutdown)
            .map_err(|e| anyhow::anyhow!("Failed to broadcast shutdown: {e}"))?;

        tokio::select! {
            joined = tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut serving) => match joined {
                Ok(joined) => joined?,
                Err(_) => {
                    tracing::warn!(
                        "Dispatcher did not stop within {SHUTDOWN_TIMEOUT:?}, abandoning it"
                    );
                    serving.abort();
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Forced shutdown, abandoning the in-flight job");
                serving.abort();
            }
        }

        // Nobody may be listening any more.
        let _ = SHUTDOWN_BROADCAST.send(Signal::Finalised);
        internal!(level = INFO, "Shutdown complete");

        Ok(())
    }
}

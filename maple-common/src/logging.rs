use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, Registry, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// Emit an event inside a short-lived span named after the subsystem.
///
/// Accepts everything `tracing::event!` does after the level, so structured
/// fields work: `internal!(level = INFO, job_id = %id, "Delivered")`.
#[macro_export]
macro_rules! log {
    ($level:expr, $span:literal, $($arg:tt)+) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($arg)+)
    }};
}

/// Traffic exchanged with the outbound relay.
#[macro_export]
macro_rules! relay {
    (level = $level:ident, $($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "relay", $($arg)+)
    };

    ($($arg:tt)+) => {
        $crate::relay!(level = TRACE, $($arg)+)
    };
}

/// Queue store activity.
#[macro_export]
macro_rules! queue {
    (level = $level:ident, $($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "queue", $($arg)+)
    };

    ($($arg:tt)+) => {
        $crate::queue!(level = TRACE, $($arg)+)
    };
}

/// Lifecycle and dispatcher bookkeeping.
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($arg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($arg)+)
    };

    ($($arg:tt)+) => {
        $crate::internal!(level = TRACE, $($arg)+)
    };
}

/// Output format selected through `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

fn level_from_env() -> LevelFilter {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

fn format_from_env() -> LogFormat {
    std::env::var("LOG_FORMAT").map_or(LogFormat::Compact, |format| {
        format.parse().unwrap_or_else(|e| {
            eprintln!("{e}, defaulting to compact output");
            LogFormat::Compact
        })
    })
}

/// Install the global subscriber.
///
/// Only events from `maple*` targets are kept. Calling this more than once is
/// harmless; later calls leave the first subscriber in place.
pub fn init() {
    let level = level_from_env();

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match format_from_env() {
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_ansi(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .boxed(),
    };

    let installed = tracing_subscriber::Registry::default()
        .with(
            layer
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("maple")
                })),
        )
        .try_init();

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

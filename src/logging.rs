//! Logging and tracing infrastructure for machnode.
//!
//! The library itself only emits `tracing` events; binaries and tests that
//! want to see them install a subscriber through the helpers here.

use std::sync::Once;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

/// Filter used when `RUST_LOG` is unset or unparsable.
const DEFAULT_FILTER: &str = "info";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event, including the current span.
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a global subscriber writing in `format`.
///
/// Only the first call in a process has any effect. `try_init` is used so
/// that a subscriber installed by the host application wins.
pub fn init_with(format: LogFormat) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter());
        let installed = match format {
            LogFormat::Text => registry
                .with(
                    fmt::layer()
                        .with_span_events(FmtSpan::CLOSE)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_span_events(FmtSpan::CLOSE)
                        .with_current_span(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .try_init(),
        };
        if installed.is_ok() {
            info!(format = ?format, "machnode tracing initialized");
        }
    });
}

/// Initialize the global tracing subscriber with text output.
pub fn init_tracing() {
    init_with(LogFormat::Text);
}

/// Initialize tracing with JSON output for structured logging.
pub fn init_tracing_json() {
    init_with(LogFormat::Json);
}

/// Macro for creating spans around a parse step
#[macro_export]
macro_rules! span_trace {
    ($name:expr) => {
        tracing::debug_span!($name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::debug_span!($name, $($field)*)
    };
}

/// Format a message and push it to a [`Context`](crate::core::context::Context)
/// as an error diagnostic.
#[macro_export]
macro_rules! diagnostic {
    ($ctx:expr, $($arg:tt)+) => {
        $ctx.error(format!($($arg)+))
    };
}

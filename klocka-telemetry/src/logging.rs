//! ## klocka-telemetry::logging
//! **Structured logging with `tracing`**
//!
//! The engine emits `clock.*` events at trace/debug level. Installing the
//! subscriber is left to binaries and tests; libraries only emit.

use tracing::info_span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global fmt subscriber.
    ///
    /// `RUST_LOG` wins over `default_level` when set. Calling this more than
    /// once is harmless: later calls leave the first subscriber in place.
    pub fn init(default_level: &str) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        let _ = fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_span_events(FmtSpan::ENTER)
            .try_init();
    }

    /// Logs the outcome of one scenario run inside a `scenario` span.
    pub fn log_scenario(name: &str, state_hash: &str, firings: usize) {
        let span = info_span!("scenario", name = name);
        let _entered = span.enter();

        tracing::info!(state_hash, firings, "Scenario completed");
    }
}

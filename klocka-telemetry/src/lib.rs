//! # Klocka Telemetry
//!
//! Crate for logging and metrics of the virtual clock engine.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;

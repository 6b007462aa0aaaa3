//! Virtual clock engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Engine limits applied by `VirtualClock::with_config`.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct ClockConfig {
    /// Default timeout for `flush_timers`, in simulated milliseconds.
    #[serde(default = "default_flush_timeout_ms")]
    #[validate(range(min = 1))]
    pub flush_timeout_ms: u64,

    /// Maximum continuations a single drain may run. Unset means unbounded.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub drain_limit: Option<usize>,
}

fn default_flush_timeout_ms() -> u64 {
    // One simulated hour.
    3_600_000
}

impl ClockConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            flush_timeout_ms: default_flush_timeout_ms(),
            drain_limit: None,
        }
    }
}

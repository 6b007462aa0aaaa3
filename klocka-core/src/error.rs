use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClockError {
    /// A timer or continuation callback returned an error. The pass that ran
    /// it stopped; the clock itself stays usable.
    #[error("callback failed at {elapsed:?}: {error:#}")]
    Callback {
        elapsed: Duration,
        error: anyhow::Error,
    },

    #[error("drain limit of {limit} continuations exceeded")]
    DrainLimitExceeded { limit: usize },

    #[error("exceeded timeout {timeout:?} while flushing timers")]
    FlushTimeout { timeout: Duration },

    #[error("future can never complete: nothing left to wake it")]
    Stalled,

    #[error("no virtual clock is active on this thread")]
    NoActiveClock,
}

impl ClockError {
    /// The callback error, if this is a propagated callback failure.
    pub fn callback_error(&self) -> Option<&anyhow::Error> {
        match self {
            ClockError::Callback { error, .. } => Some(error),
            _ => None,
        }
    }
}

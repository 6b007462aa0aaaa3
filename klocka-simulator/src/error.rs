use thiserror::Error;

use klocka_core::ClockError;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("Expectation failed at step {step}: {message}")]
    Expectation { step: usize, message: String },

    #[error("Invariant violated at record {index}: {reason}")]
    Invariant { index: usize, reason: String },

    #[error("Nondeterministic run for seed {seed}: {first} != {second}")]
    Nondeterministic {
        seed: u64,
        first: String,
        second: String,
    },

    #[error("Scenario format error: {0}")]
    Format(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

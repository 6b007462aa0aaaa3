//! Scenario simulator and fuzzer configuration.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// Seed for generated scenarios.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of generated scenarios per fuzz run.
    #[serde(default = "default_fuzz_iterations")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub fuzz_iterations: usize,

    /// Upper bound on steps in a generated scenario.
    #[serde(default = "default_max_steps")]
    #[validate(range(min = 1, max = 100_000))]
    pub max_steps: usize,
}

fn default_seed() -> u64 {
    42
}

fn default_fuzz_iterations() -> usize {
    100
}

fn default_max_steps() -> usize {
    64
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            fuzz_iterations: default_fuzz_iterations(),
            max_steps: default_max_steps(),
        }
    }
}

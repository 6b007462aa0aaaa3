//! Seeded scenario generation and determinism fuzzing.
//!
//! Every generated scenario is run twice on fresh clocks. Diverging state
//! hashes mean the engine is not deterministic; invariant failures surface
//! from the runner itself.

use blake3::Hasher;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::SimulationError;
use crate::runner::ScenarioRunner;
use crate::scenario::{Scenario, Step};

const MAX_DELAY_MS: u64 = 5_000;
const MAX_PERIOD_MS: u64 = 500;
const MAX_PERIODIC_LIMIT: u64 = 8;
const MAX_NESTING: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct FuzzReport {
    pub seed: u64,
    pub iterations: usize,
    pub firings: usize,
    /// BLAKE3 over the state hashes of every iteration, hex encoded.
    pub digest: String,
}

struct Generator {
    rng: SmallRng,
    labels: Vec<String>,
}

impl Generator {
    fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            labels: Vec::new(),
        }
    }

    fn label(&mut self, prefix: &str) -> String {
        let label = format!("{prefix}{}", self.labels.len());
        self.labels.push(label.clone());
        label
    }

    fn top_level(&mut self) -> Step {
        // 7 in 10 schedule work, 2 advance, 1 flushes.
        match self.rng.random_range(0..10) {
            0..=6 => self.schedulable(0),
            7 | 8 => Step::Advance {
                ms: self.rng.random_range(0..=MAX_DELAY_MS),
            },
            _ => Step::FlushTimers {
                flush_periodic: false,
            },
        }
    }

    fn schedulable(&mut self, depth: usize) -> Step {
        match self.rng.random_range(0..6) {
            0 | 1 => {
                let then = self.children(depth);
                Step::Timer {
                    label: self.label("t"),
                    delay_ms: self.rng.random_range(0..=MAX_DELAY_MS),
                    then,
                }
            }
            2 => Step::Periodic {
                label: self.label("p"),
                period_ms: self.rng.random_range(1..=MAX_PERIOD_MS),
                limit: Some(self.rng.random_range(1..=MAX_PERIODIC_LIMIT)),
            },
            3 => {
                let then = self.children(depth);
                Step::Continuation {
                    label: self.label("c"),
                    then,
                }
            }
            4 if !self.labels.is_empty() => {
                let index = self.rng.random_range(0..self.labels.len());
                Step::Cancel {
                    label: self.labels[index].clone(),
                }
            }
            _ => Step::AdvanceBlocking {
                ms: self.rng.random_range(0..=MAX_DELAY_MS / 10),
            },
        }
    }

    fn children(&mut self, depth: usize) -> Vec<Step> {
        if depth >= MAX_NESTING || !self.rng.random_bool(0.3) {
            return Vec::new();
        }
        let count = self.rng.random_range(1..=2);
        (0..count).map(|_| self.schedulable(depth + 1)).collect()
    }
}

/// Builds a random but valid scenario with at most `max_steps` top-level
/// steps, ending in a full flush. Same seed, same scenario.
pub fn generate_scenario(seed: u64, max_steps: usize) -> Scenario {
    let mut generator = Generator::new(seed);
    let count = generator.rng.random_range(1..=max_steps.max(1));
    let mut scenario = Scenario::new(format!("fuzz-{seed}"));
    for _ in 0..count {
        let step = generator.top_level();
        scenario.steps.push(step);
    }
    scenario.steps.push(Step::FlushTimers {
        flush_periodic: true,
    });
    scenario
}

impl ScenarioRunner {
    /// Runs `iterations` generated scenarios with seeds `seed..`, each twice.
    pub fn fuzz(
        &self,
        seed: u64,
        iterations: usize,
        max_steps: usize,
    ) -> Result<FuzzReport, SimulationError> {
        let mut digest = Hasher::new();
        let mut firings = 0;

        for iteration in 0..iterations {
            let scenario_seed = seed.wrapping_add(iteration as u64);
            let scenario = generate_scenario(scenario_seed, max_steps);

            let first = self.run(&scenario)?;
            let second = self.run(&scenario)?;
            if first.state_hash != second.state_hash {
                return Err(SimulationError::Nondeterministic {
                    seed: scenario_seed,
                    first: first.state_hash,
                    second: second.state_hash,
                });
            }
            debug!(seed = scenario_seed, hash = %first.state_hash, "Fuzz iteration passed");

            digest.update(first.state_hash.as_bytes());
            firings += first.trace.len();
        }

        let digest = hex::encode(digest.finalize().as_bytes());
        info!(seed, iterations, firings, %digest, "Fuzzing completed");
        Ok(FuzzReport {
            seed,
            iterations,
            firings,
            digest,
        })
    }
}

/// [`ScenarioRunner::fuzz`] with the default clock configuration.
pub fn fuzz(seed: u64, iterations: usize, max_steps: usize) -> Result<FuzzReport, SimulationError> {
    ScenarioRunner::default().fuzz(seed, iterations, max_steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_seeded() {
        assert_eq!(generate_scenario(7, 32), generate_scenario(7, 32));
        assert_ne!(generate_scenario(7, 32), generate_scenario(8, 32));
    }

    #[test]
    fn test_top_level_steps_are_mostly_schedulable() {
        let mut generator = Generator::new(3);
        let (mut schedulable, mut advances, mut flushes) = (0, 0, 0);
        for _ in 0..1_000 {
            match generator.top_level() {
                Step::Advance { .. } => advances += 1,
                Step::FlushTimers { flush_periodic } => {
                    assert!(!flush_periodic);
                    flushes += 1;
                }
                _ => schedulable += 1,
            }
        }
        assert!(advances > 0 && flushes > 0);
        assert!(schedulable > advances + flushes);
    }

    #[test]
    fn test_generated_scenarios_validate() {
        for seed in 0..50 {
            let scenario = generate_scenario(seed, 40);
            assert!(scenario.steps.len() <= 41);
            scenario.validate().unwrap();
        }
    }

    #[test]
    fn test_fuzz_digest_is_reproducible() {
        let first = fuzz(42, 10, 24).unwrap();
        let second = fuzz(42, 10, 24).unwrap();
        assert_eq!(first.digest, second.digest);
        assert_eq!(first.iterations, 10);
    }
}

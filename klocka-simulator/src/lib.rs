// klocka-simulator/src/lib.rs

/*!
# Klocka Simulator

Deterministic scenario runner and fuzzer on top of the virtual clock.

## Key Components:
- **Scenario:** YAML script of timers, periodic timers, continuations,
  cancellations and time control, with nested steps scheduled from inside
  callbacks.
- **Runner:** executes a scenario on a fresh clock and records a firing trace.
- **Invariants:** post-run checks over the trace.
- **Fuzz:** seeded scenario generation; every scenario runs twice and the
  BLAKE3 state hashes must match.
*/

pub mod error;
pub mod fuzz;
pub mod invariants;
pub mod runner;
pub mod scenario;
pub mod trace;

pub use error::SimulationError;
pub use fuzz::{fuzz, generate_scenario, FuzzReport};
pub use invariants::check_trace;
pub use runner::{ScenarioRunner, SimulationReport};
pub use scenario::{load_scenario, save_scenario, Scenario, Step};
pub use trace::{FiringKind, FiringRecord, Trace};

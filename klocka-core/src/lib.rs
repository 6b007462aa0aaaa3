//! # klocka-core
//!
//! Deterministic virtual-time execution engine for testing time-dependent
//! code without real waiting.
//!
//! Code under test takes a [`Scheduler`] (or reaches the active one through
//! [`context`]) and schedules timers, periodic timers and deferred
//! continuations on it. Nothing runs until the test driver calls
//! [`VirtualClock::advance`], which moves simulated time forward and executes
//! every callback due in the window, in a fully reproducible order.
//!
//! ### Key Submodules:
//! - `clock`: the engine, its advance/flush operations and introspection
//! - `timer`: timer handles and the `(deadline, seq)` ordered registry
//! - `queue`: the FIFO continuation queue
//! - `task`: futures driven by virtual time (`sleep`, `spawn`, `block_on`)
//! - `context`: thread-local access to the active clock

pub mod clock;
pub mod context;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod timer;

pub mod prelude {
    pub use crate::clock::VirtualClock;
    pub use crate::error::ClockError;
    pub use crate::queue::CallbackOutcome;
    pub use crate::scheduler::{Scheduler, MIN_PERIOD};
    pub use crate::task::{JoinHandle, Sleep, TaskId, YieldNow};
    pub use crate::timer::{PendingTimer, Timer, TimerId};
}

pub use clock::VirtualClock;
pub use error::ClockError;
pub use scheduler::Scheduler;
pub use timer::Timer;

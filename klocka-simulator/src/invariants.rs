//! Post-run checks over a firing trace.
//!
//! - time observed by callbacks never decreases
//! - nothing runs before its deadline
//! - continuations run in the order they were scheduled
//! - periodic firing `k` happens at `scheduled_at + (k + 1) * period`

use std::time::Duration;

use crate::error::SimulationError;
use crate::trace::{FiringKind, Trace};

pub fn check_trace(trace: &Trace) -> Result<(), SimulationError> {
    let mut last_elapsed = Duration::ZERO;
    let mut last_continuation: Option<u64> = None;

    for (index, record) in trace.records().iter().enumerate() {
        let violation = |reason: String| SimulationError::Invariant { index, reason };

        if record.elapsed < last_elapsed {
            return Err(violation(format!(
                "'{}' observed {:?} after {:?}",
                record.label, record.elapsed, last_elapsed
            )));
        }
        if record.elapsed < record.deadline {
            return Err(violation(format!(
                "'{}' ran at {:?} before its deadline {:?}",
                record.label, record.elapsed, record.deadline
            )));
        }
        if record.kind == FiringKind::Continuation {
            if last_continuation.is_some_and(|previous| record.order < previous) {
                return Err(violation(format!(
                    "continuation '{}' ran out of FIFO order",
                    record.label
                )));
            }
            last_continuation = Some(record.order);
        }
        if let Some(period) = record.period {
            let expected =
                record.scheduled_at.as_nanos() + period.as_nanos() * u128::from(record.tick + 1);
            if record.deadline.as_nanos() != expected {
                return Err(violation(format!(
                    "periodic '{}' tick {} drifted to {:?}",
                    record.label, record.tick, record.deadline
                )));
            }
        }
        last_elapsed = record.elapsed;
    }
    Ok(())
}

//! Scenario runner.
//!
//! Drives one fresh [`VirtualClock`] per run. Top-level steps execute in
//! order; timer and continuation callbacks record a [`FiringRecord`] and then
//! apply their nested `then` steps from inside the callback.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace};

use klocka_config::ClockConfig;
use klocka_core::{Scheduler, Timer, VirtualClock};
use klocka_telemetry::{EventLogger, MetricsRecorder};

use crate::error::SimulationError;
use crate::invariants::check_trace;
use crate::scenario::{Scenario, Step};
use crate::trace::{FiringKind, FiringRecord, Trace};

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub name: String,
    /// Hex BLAKE3 digest of the trace; equal for equal scenarios.
    pub state_hash: String,
    pub elapsed: Duration,
    pub pending_timers: usize,
    pub trace: Trace,
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioRunner {
    config: ClockConfig,
    metrics: Option<MetricsRecorder>,
}

impl ScenarioRunner {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn run(&self, scenario: &Scenario) -> Result<SimulationReport, SimulationError> {
        scenario.validate()?;

        let mut clock = VirtualClock::with_config(&self.config);
        if let Some(metrics) = &self.metrics {
            clock = clock.with_metrics(metrics.clone());
        }
        let clock = Rc::new(clock);
        let harness = Rc::new(Harness::new(&clock));

        for (index, step) in scenario.steps.iter().enumerate() {
            debug!(scenario = %scenario.name, step = index, ?step, "Running step");
            match step {
                Step::Advance { ms } => clock.advance(Duration::from_millis(*ms))?,
                Step::FlushTimers { flush_periodic } => clock.flush_timers(*flush_periodic)?,
                Step::ExpectQuiescent { value } => {
                    let actual = clock.is_quiescent();
                    if actual != *value {
                        return Err(SimulationError::Expectation {
                            step: index,
                            message: format!("expected quiescent={value}, clock reports {actual}"),
                        });
                    }
                }
                schedulable => harness.apply(schedulable)?,
            }
        }

        let trace = harness.take_trace();
        check_trace(&trace)?;
        let state_hash = trace.state_hash();
        EventLogger::log_scenario(&scenario.name, &state_hash, trace.len());

        Ok(SimulationReport {
            name: scenario.name.clone(),
            state_hash,
            elapsed: clock.elapsed(),
            pending_timers: clock.pending_timers().len(),
            trace,
        })
    }
}

/// Where a callback came from, captured when it is scheduled.
#[derive(Clone)]
struct Origin {
    label: String,
    kind: FiringKind,
    order: u64,
    scheduled_at: Duration,
    period: Option<Duration>,
}

struct Harness {
    clock: Weak<VirtualClock>,
    scheduler: Scheduler,
    timers: RefCell<BTreeMap<String, Timer>>,
    trace: RefCell<Trace>,
    next_order: Cell<u64>,
}

impl Harness {
    fn new(clock: &Rc<VirtualClock>) -> Self {
        Self {
            clock: Rc::downgrade(clock),
            scheduler: clock.scheduler(),
            timers: RefCell::new(BTreeMap::new()),
            trace: RefCell::new(Trace::new()),
            next_order: Cell::new(0),
        }
    }

    fn origin(&self, kind: FiringKind, label: &str, period: Option<Duration>) -> Origin {
        let order = self.next_order.get();
        self.next_order.set(order + 1);
        Origin {
            label: label.to_owned(),
            kind,
            order,
            scheduled_at: self.scheduler.now(),
            period,
        }
    }

    fn apply(self: &Rc<Self>, step: &Step) -> Result<(), SimulationError> {
        match step {
            Step::Timer {
                label,
                delay_ms,
                then,
            } => {
                let delay = Duration::from_millis(*delay_ms);
                let origin = self.origin(FiringKind::Timer, label, None);
                let deadline = origin.scheduled_at.saturating_add(delay);
                let harness = Rc::clone(self);
                let then = then.clone();
                let timer = self
                    .scheduler
                    .set_timeout(delay, move || harness.fire(origin, deadline, 0, &then));
                self.timers.borrow_mut().insert(label.clone(), timer);
            }
            Step::Periodic {
                label,
                period_ms,
                limit,
            } => {
                let period = Duration::from_millis(*period_ms);
                let origin = self.origin(FiringKind::Periodic, label, Some(period));
                let harness = Rc::clone(self);
                let limit = *limit;
                let timer = self.scheduler.set_interval(period, move |timer: &Timer| {
                    let tick = timer.tick();
                    if limit.is_some_and(|limit| tick + 1 >= limit) {
                        timer.cancel();
                    }
                    harness.fire(origin.clone(), timer.deadline(), tick, &[])
                });
                self.timers.borrow_mut().insert(label.clone(), timer);
            }
            Step::Continuation { label, then } => {
                let origin = self.origin(FiringKind::Continuation, label, None);
                let deadline = origin.scheduled_at;
                let harness = Rc::clone(self);
                let then = then.clone();
                self.scheduler
                    .schedule(move || harness.fire(origin, deadline, 0, &then));
            }
            Step::Cancel { label } => {
                let timer = self.timers.borrow().get(label).cloned();
                match timer {
                    Some(timer) => timer.cancel(),
                    None => debug!(label = %label, "Cancel before the timer was scheduled; ignored"),
                }
            }
            Step::AdvanceBlocking { ms } => {
                if let Some(clock) = self.clock.upgrade() {
                    clock.advance_blocking(Duration::from_millis(*ms));
                }
            }
            other => {
                return Err(SimulationError::InvalidScenario(format!(
                    "{other:?} cannot run inside a callback"
                )))
            }
        }
        Ok(())
    }

    fn fire(
        self: &Rc<Self>,
        origin: Origin,
        deadline: Duration,
        tick: u64,
        then: &[Step],
    ) -> Result<(), SimulationError> {
        let elapsed = self.scheduler.now();
        trace!(label = %origin.label, ?elapsed, tick, "Callback fired");
        self.trace.borrow_mut().record(FiringRecord {
            label: origin.label,
            kind: origin.kind,
            order: origin.order,
            scheduled_at: origin.scheduled_at,
            deadline,
            period: origin.period,
            elapsed,
            tick,
        });
        for step in then {
            self.apply(step)?;
        }
        Ok(())
    }

    fn take_trace(&self) -> Trace {
        std::mem::take(&mut *self.trace.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(report: &SimulationReport) -> Vec<(&str, u128)> {
        report
            .trace
            .records()
            .iter()
            .map(|r| (r.label.as_str(), r.elapsed.as_millis()))
            .collect()
    }

    #[test]
    fn test_nested_steps_run_inside_callbacks() {
        let scenario = Scenario::new("nested")
            .step(Step::Timer {
                label: "outer".into(),
                delay_ms: 100,
                then: vec![
                    Step::Continuation {
                        label: "follow-up".into(),
                        then: vec![],
                    },
                    Step::Timer {
                        label: "inner".into(),
                        delay_ms: 50,
                        then: vec![],
                    },
                ],
            })
            .step(Step::Advance { ms: 200 });

        let report = ScenarioRunner::default().run(&scenario).unwrap();
        assert_eq!(
            labels(&report),
            vec![("outer", 100), ("follow-up", 100), ("inner", 150)]
        );
        assert_eq!(report.elapsed, Duration::from_millis(200));
    }

    #[test]
    fn test_cancel_step_stops_periodic() {
        let scenario = Scenario::new("cancel")
            .step(Step::Periodic {
                label: "tick".into(),
                period_ms: 10,
                limit: None,
            })
            .step(Step::Advance { ms: 25 })
            .step(Step::Cancel {
                label: "tick".into(),
            })
            .step(Step::Advance { ms: 100 });

        let report = ScenarioRunner::default().run(&scenario).unwrap();
        assert_eq!(labels(&report), vec![("tick", 10), ("tick", 20)]);
        assert_eq!(report.pending_timers, 0);
    }

    #[test]
    fn test_failed_expectation_names_the_step() {
        let scenario = Scenario::new("busy")
            .step(Step::Timer {
                label: "pending".into(),
                delay_ms: 10,
                then: vec![],
            })
            .step(Step::ExpectQuiescent { value: true });

        let err = ScenarioRunner::default().run(&scenario).unwrap_err();
        assert!(matches!(err, SimulationError::Expectation { step: 1, .. }));
    }

    #[test]
    fn test_flush_timeout_surfaces_as_clock_error() {
        let config = ClockConfig {
            flush_timeout_ms: 1_000,
            ..ClockConfig::default()
        };
        let scenario = Scenario::new("far")
            .step(Step::Timer {
                label: "late".into(),
                delay_ms: 5_000,
                then: vec![],
            })
            .step(Step::FlushTimers {
                flush_periodic: false,
            });

        let err = ScenarioRunner::new(config).run(&scenario).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Clock(klocka_core::ClockError::FlushTimeout { .. })
        ));
    }

    #[test]
    fn test_metrics_follow_the_run() {
        let metrics = MetricsRecorder::new().unwrap();
        let scenario = Scenario::new("metered")
            .step(Step::Continuation {
                label: "c".into(),
                then: vec![],
            })
            .step(Step::Timer {
                label: "t".into(),
                delay_ms: 1,
                then: vec![],
            })
            .step(Step::FlushTimers {
                flush_periodic: false,
            });

        ScenarioRunner::default()
            .with_metrics(metrics.clone())
            .run(&scenario)
            .unwrap();
        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("klocka_timers_fired_total 1"));
        assert!(text.contains("klocka_continuations_run_total 1"));
    }
}

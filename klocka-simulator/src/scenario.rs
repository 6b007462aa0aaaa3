//! Scenario model.
//!
//! A scenario is an ordered script of scheduling and time-control steps,
//! stored as YAML:
//!
//! ```yaml
//! name: heartbeat
//! steps:
//!   - type: periodic
//!     label: beat
//!     period_ms: 1000
//!     limit: 3
//!   - type: timer
//!     label: deadline
//!     delay_ms: 2500
//!     then:
//!       - type: continuation
//!         label: cleanup
//!   - type: advance
//!     ms: 5000
//!   - type: expect_quiescent
//!     value: true
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// One-shot timer. `then` steps are scheduled from inside its callback.
    Timer {
        label: String,
        delay_ms: u64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        then: Vec<Step>,
    },
    /// Periodic timer; cancels itself after `limit` firings when set.
    Periodic {
        label: String,
        period_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u64>,
    },
    Continuation {
        label: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        then: Vec<Step>,
    },
    Cancel {
        label: String,
    },
    Advance {
        ms: u64,
    },
    AdvanceBlocking {
        ms: u64,
    },
    FlushTimers {
        #[serde(default)]
        flush_periodic: bool,
    },
    ExpectQuiescent {
        value: bool,
    },
}

impl Step {
    /// Steps that drive the clock can only appear at the top level.
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            Step::Timer { .. }
                | Step::Periodic { .. }
                | Step::Continuation { .. }
                | Step::Cancel { .. }
                | Step::AdvanceBlocking { .. }
        )
    }

    fn children(&self) -> &[Step] {
        match self {
            Step::Timer { then, .. } | Step::Continuation { then, .. } => then,
            _ => &[],
        }
    }
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Rejects clock-driving steps nested under a callback (they would
    /// re-enter `advance`) and cancels of labels declared nowhere.
    pub fn validate(&self) -> Result<(), SimulationError> {
        let mut declared = BTreeSet::new();
        collect_labels(&self.steps, &mut declared);
        for step in &self.steps {
            check_step(step, false, &declared)?;
        }
        Ok(())
    }
}

fn collect_labels<'a>(steps: &'a [Step], labels: &mut BTreeSet<&'a str>) {
    for step in steps {
        match step {
            Step::Timer { label, .. }
            | Step::Periodic { label, .. }
            | Step::Continuation { label, .. } => {
                labels.insert(label.as_str());
            }
            _ => {}
        }
        collect_labels(step.children(), labels);
    }
}

fn check_step(step: &Step, nested: bool, declared: &BTreeSet<&str>) -> Result<(), SimulationError> {
    if nested && !step.is_schedulable() {
        return Err(SimulationError::InvalidScenario(format!(
            "{step:?} cannot run inside a callback"
        )));
    }
    if let Step::Cancel { label } = step {
        if !declared.contains(label.as_str()) {
            return Err(SimulationError::InvalidScenario(format!(
                "cancel of undeclared label '{label}'"
            )));
        }
    }
    if let Step::Periodic {
        label,
        period_ms,
        limit,
    } = step
    {
        if *period_ms == 0 || *limit == Some(0) {
            return Err(SimulationError::InvalidScenario(format!(
                "periodic '{label}' needs a non-zero period and limit"
            )));
        }
    }
    for child in step.children() {
        check_step(child, true, declared)?;
    }
    Ok(())
}

pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario, SimulationError> {
    let text = fs::read_to_string(path)?;
    let scenario: Scenario = serde_yaml::from_str(&text)?;
    scenario.validate()?;
    Ok(scenario)
}

pub fn save_scenario(path: impl AsRef<Path>, scenario: &Scenario) -> Result<(), SimulationError> {
    let text = serde_yaml::to_string(scenario)?;
    fs::write(path, text)?;
    Ok(())
}

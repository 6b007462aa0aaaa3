//! Firing trace and its state hash.

use std::time::Duration;

use blake3::Hasher;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FiringKind {
    Timer,
    Periodic,
    Continuation,
}

impl FiringKind {
    fn tag(self) -> u8 {
        match self {
            FiringKind::Timer => 0,
            FiringKind::Periodic => 1,
            FiringKind::Continuation => 2,
        }
    }
}

/// One callback invocation observed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiringRecord {
    pub label: String,
    pub kind: FiringKind,
    /// Scheduling order across the whole run.
    pub order: u64,
    /// When the callback was scheduled.
    pub scheduled_at: Duration,
    /// Earliest time the callback was allowed to run.
    pub deadline: Duration,
    pub period: Option<Duration>,
    /// Simulated time observed by the callback.
    pub elapsed: Duration,
    /// Firings of the same timer before this one.
    pub tick: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Trace {
    records: Vec<FiringRecord>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: FiringRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[FiringRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// BLAKE3 over `(label, kind, elapsed, tick)` of every record, hex encoded.
    pub fn state_hash(&self) -> String {
        let mut hasher = Hasher::new();
        for record in &self.records {
            hasher.update(&(record.label.len() as u64).to_le_bytes());
            hasher.update(record.label.as_bytes());
            hasher.update(&[record.kind.tag()]);
            hasher.update(&record.elapsed.as_nanos().to_le_bytes());
            hasher.update(&record.tick.to_le_bytes());
        }
        hex::encode(hasher.finalize().as_bytes())
    }
}

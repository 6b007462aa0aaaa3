//! ## klocka-core::timer
//! **Timer handles and the deadline-ordered registry**
//!
//! The registry is keyed by `(deadline, seq)`. `seq` grows monotonically per
//! insertion, so timers sharing a deadline fire in insertion order and a
//! re-inserted periodic timer queues behind timers already waiting on the
//! same deadline.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::clock::Shared;
use crate::queue::BoxedCallback;

/// Monotonically increasing insertion sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seq(u64);

impl Seq {
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Stable identity of a timer for the lifetime of its clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

impl TimerId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TimerKey {
    deadline: Duration,
    seq: Seq,
}

/// State shared between a `Timer` handle and its registry entry.
pub(crate) struct TimerState {
    pub(crate) id: TimerId,
    pub(crate) period: Option<Duration>,
    deadline: Cell<Duration>,
    tick: Cell<u64>,
    active: Cell<bool>,
    /// `Some` while the entry sits in the registry.
    key: Cell<Option<TimerKey>>,
}

impl TimerState {
    pub(crate) fn new(id: TimerId, deadline: Duration, period: Option<Duration>) -> Self {
        Self {
            id,
            period,
            deadline: Cell::new(deadline),
            tick: Cell::new(0),
            active: Cell::new(true),
            key: Cell::new(None),
        }
    }

    #[inline]
    pub(crate) fn deadline(&self) -> Duration {
        self.deadline.get()
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Returns whether the timer was active before this call.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.replace(false)
    }

    pub(crate) fn key(&self) -> Option<TimerKey> {
        self.key.get()
    }

    pub(crate) fn record_firing(&self) {
        self.tick.set(self.tick.get() + 1);
    }

    /// Moves a periodic deadline forward by one period. Returns the new deadline.
    pub(crate) fn reschedule(&self, period: Duration) -> Duration {
        let next = self.deadline.get().saturating_add(period);
        self.deadline.set(next);
        next
    }
}

pub(crate) type PeriodicCallback = Box<dyn FnMut(&Timer) -> anyhow::Result<()>>;

pub(crate) enum TimerCallback {
    Once(BoxedCallback),
    Periodic(PeriodicCallback),
}

pub(crate) struct TimerEntry {
    pub(crate) state: Rc<TimerState>,
    pub(crate) callback: TimerCallback,
}

/// Cancellable, queryable handle to a scheduled timer.
///
/// Cloning yields another handle to the same timer. Handles do not keep the
/// clock alive; cancelling after the clock is gone is a no-op.
#[derive(Clone)]
pub struct Timer {
    state: Rc<TimerState>,
    shared: Weak<Shared>,
}

impl Timer {
    pub(crate) fn new(state: Rc<TimerState>, shared: Weak<Shared>) -> Self {
        Self { state, shared }
    }

    pub fn id(&self) -> TimerId {
        self.state.id
    }

    /// Absolute simulated time of the next (or, once fired, the last) firing.
    pub fn deadline(&self) -> Duration {
        self.state.deadline()
    }

    pub fn period(&self) -> Option<Duration> {
        self.state.period
    }

    pub fn is_periodic(&self) -> bool {
        self.state.period.is_some()
    }

    /// Number of completed firings.
    pub fn tick(&self) -> u64 {
        self.state.tick.get()
    }

    /// False once cancelled, or once a one-shot timer has fired.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Cancels the timer. Idempotent: cancelling a fired or already
    /// cancelled timer does nothing.
    pub fn cancel(&self) {
        if !self.state.deactivate() {
            return;
        }
        tracing::trace!(
            event = "clock.timer.cancel",
            timer_id = self.state.id.value(),
            "Timer cancelled"
        );
        if let Some(shared) = self.shared.upgrade() {
            shared.remove_timer(&self.state);
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.state.id)
            .field("deadline", &self.deadline())
            .field("period", &self.period())
            .field("tick", &self.tick())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Point-in-time description of a pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: TimerId,
    pub deadline: Duration,
    pub period: Option<Duration>,
    pub tick: u64,
}

/// Pending timers ordered by `(deadline, seq)`.
pub(crate) struct TimerRegistry {
    timers: BTreeMap<TimerKey, TimerEntry>,
    seq: Seq,
    periodic: usize,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
            seq: Seq::zero(),
            periodic: 0,
        }
    }

    fn next_seq(&mut self) -> Seq {
        let current = self.seq;
        self.seq = self.seq.next();
        current
    }

    /// O(log n).
    pub(crate) fn insert(&mut self, entry: TimerEntry) -> Seq {
        let seq = self.next_seq();
        let key = TimerKey {
            deadline: entry.state.deadline(),
            seq,
        };
        entry.state.key.set(Some(key));
        if entry.state.period.is_some() {
            self.periodic += 1;
        }
        self.timers.insert(key, entry);
        seq
    }

    pub(crate) fn peek_deadline(&self) -> Option<Duration> {
        self.timers.first_key_value().map(|(key, _)| key.deadline)
    }

    /// Removes the earliest timer if its deadline is at or before `limit`.
    pub(crate) fn pop_due(&mut self, limit: Duration) -> Option<TimerEntry> {
        if self.peek_deadline()? > limit {
            return None;
        }
        let (_, entry) = self.timers.pop_first()?;
        Some(self.detach(entry))
    }

    /// O(log n); `None` if the key is no longer present.
    pub(crate) fn remove(&mut self, key: TimerKey) -> Option<TimerEntry> {
        let entry = self.timers.remove(&key)?;
        Some(self.detach(entry))
    }

    fn detach(&mut self, entry: TimerEntry) -> TimerEntry {
        entry.state.key.set(None);
        if entry.state.period.is_some() {
            self.periodic -= 1;
        }
        entry
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    pub(crate) fn periodic_count(&self) -> usize {
        self.periodic
    }

    pub(crate) fn one_shot_count(&self) -> usize {
        self.timers.len() - self.periodic
    }

    pub(crate) fn snapshot(&self) -> Vec<PendingTimer> {
        self.timers
            .values()
            .map(|entry| PendingTimer {
                id: entry.state.id,
                deadline: entry.state.deadline(),
                period: entry.state.period,
                tick: entry.state.tick.get(),
            })
            .collect()
    }

    /// Empties the registry; the caller drops the entries outside any borrow.
    pub(crate) fn take_all(&mut self) -> Vec<TimerEntry> {
        self.periodic = 0;
        std::mem::take(&mut self.timers)
            .into_values()
            .map(|entry| {
                entry.state.key.set(None);
                entry
            })
            .collect()
    }
}

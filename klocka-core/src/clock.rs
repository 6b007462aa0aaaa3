//! # Virtual Clock
//!
//! A deterministic, single-threaded discrete-event engine. Simulated time
//! only moves inside [`VirtualClock::advance`] (or `advance_blocking`), and
//! every callback runs synchronously, strictly nested inside the call that
//! triggered it.
//!
//! ## Ordering
//! 1. Continuations queued before an `advance` run before any timer fires.
//! 2. Timers fire in `(deadline, insertion)` order.
//! 3. Continuations queued by a timer callback run before the next timer is
//!    considered.
//! 4. A periodic timer's next deadline is `previous deadline + period`,
//!    independent of when its callback ran.
//!
//! No `RefCell` borrow is ever held while user code runs, so callbacks may
//! freely schedule, cancel and query through their [`Scheduler`].

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crossbeam::queue::SegQueue;
use tracing::{debug, trace};

use klocka_config::ClockConfig;
use klocka_telemetry::MetricsRecorder;

use crate::context;
use crate::error::ClockError;
use crate::queue::{Continuation, ContinuationQueue};
use crate::scheduler::Scheduler;
use crate::task::{LocalFuture, ReadyQueue, TaskId, TaskSet};
use crate::timer::{
    PendingTimer, PeriodicCallback, Timer, TimerCallback, TimerEntry, TimerId, TimerRegistry,
    TimerState,
};

pub(crate) struct Core {
    elapsed: Duration,
    advancing: bool,
    continuations: ContinuationQueue,
    timers: TimerRegistry,
    tasks: TaskSet,
    next_timer_id: u64,
    drain_limit: Option<usize>,
    flush_timeout: Duration,
    metrics: Option<MetricsRecorder>,
}

/// State shared by the clock, its schedulers and (weakly) its timer handles.
pub(crate) struct Shared {
    core: RefCell<Core>,
    ready: ReadyQueue,
}

impl Shared {
    fn new(config: &ClockConfig) -> Self {
        Self {
            core: RefCell::new(Core {
                elapsed: Duration::ZERO,
                advancing: false,
                continuations: ContinuationQueue::new(),
                timers: TimerRegistry::new(),
                tasks: TaskSet::default(),
                next_timer_id: 0,
                drain_limit: config.drain_limit,
                flush_timeout: config.flush_timeout(),
                metrics: None,
            }),
            ready: Arc::new(SegQueue::new()),
        }
    }

    pub(crate) fn now(&self) -> Duration {
        self.core.borrow().elapsed
    }

    pub(crate) fn insert_timer(
        self: &Rc<Self>,
        delay: Duration,
        period: Option<Duration>,
        callback: TimerCallback,
    ) -> Timer {
        let state = {
            let mut core = self.core.borrow_mut();
            let deadline = core.elapsed.saturating_add(delay);
            let id = TimerId(core.next_timer_id);
            core.next_timer_id += 1;

            let state = Rc::new(TimerState::new(id, deadline, period));
            let seq = core.timers.insert(TimerEntry {
                state: Rc::clone(&state),
                callback,
            });
            trace!(
                event = "clock.timer.set",
                timer_id = id.value(),
                ?delay,
                ?deadline,
                periodic = period.is_some(),
                %seq,
                "Timer scheduled"
            );
            state
        };
        Timer::new(state, Rc::downgrade(self))
    }

    pub(crate) fn remove_timer(&self, state: &TimerState) {
        let Some(key) = state.key() else {
            // Already fired, or firing right now.
            return;
        };
        // During teardown the core may be borrowed; the inactive entry is
        // then skipped when popped.
        let removed = match self.core.try_borrow_mut() {
            Ok(mut core) => core.timers.remove(key),
            Err(_) => None,
        };
        drop(removed);
    }

    pub(crate) fn schedule(&self, continuation: Continuation) {
        let mut core = self.core.borrow_mut();
        core.continuations.schedule(continuation);
        trace!(
            event = "clock.continuation.schedule",
            queued = core.continuations.len(),
            "Continuation scheduled"
        );
    }

    pub(crate) fn spawn(&self, future: LocalFuture) -> TaskId {
        let id = self.core.borrow_mut().tasks.insert(future, &self.ready);
        trace!(event = "clock.task.spawn", task = %id, "Task spawned");
        id
    }

    fn promote_ready(&self, core: &mut Core) {
        while let Some(id) = self.ready.pop() {
            if core.tasks.mark_queued(id) {
                core.continuations.schedule(Continuation::Poll(id));
            }
        }
    }

    /// Runs continuations until the queue is observably empty. Returns how
    /// many ran. On a callback error the rest stay queued.
    fn drain(&self) -> Result<u64, ClockError> {
        let limit = self.core.borrow().drain_limit;
        let mut ran: u64 = 0;
        loop {
            let next = {
                let mut core = self.core.borrow_mut();
                self.promote_ready(&mut core);
                core.continuations.pop()
            };
            let Some(continuation) = next else {
                return Ok(ran);
            };
            if let Some(limit) = limit {
                if ran >= limit as u64 {
                    self.core.borrow_mut().continuations.restore(continuation);
                    return Err(ClockError::DrainLimitExceeded { limit });
                }
            }
            ran += 1;
            self.run_continuation(continuation)?;
        }
    }

    fn run_continuation(&self, continuation: Continuation) -> Result<(), ClockError> {
        match continuation {
            Continuation::Callback(callback) => {
                trace!(event = "clock.continuation.run", "Running continuation");
                let outcome = callback();
                self.record(MetricsRecorder::inc_continuations_run);
                outcome.map_err(|error| self.callback_error(error))
            }
            Continuation::Poll(id) => {
                self.poll_task(id);
                self.record(MetricsRecorder::inc_continuations_run);
                Ok(())
            }
        }
    }

    fn poll_task(&self, id: TaskId) {
        let polled = self.core.borrow_mut().tasks.begin_poll(id);
        let Some((mut future, waker)) = polled else {
            return;
        };
        trace!(event = "clock.task.poll", task = %id, "Polling task");

        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                let slot = self.core.borrow_mut().tasks.remove(id);
                drop(slot);
                drop(future);
                trace!(event = "clock.task.complete", task = %id, "Task completed");
            }
            Poll::Pending => self.core.borrow_mut().tasks.finish_poll(id, future),
        }
    }

    /// Pops the earliest active timer due at or before `limit` and moves
    /// `elapsed` up to its deadline.
    fn pop_due(&self, limit: Duration) -> Option<TimerEntry> {
        loop {
            let entry = self.core.borrow_mut().timers.pop_due(limit)?;
            if entry.state.is_active() {
                let mut core = self.core.borrow_mut();
                core.elapsed = core.elapsed.max(entry.state.deadline());
                return Some(entry);
            }
            drop(entry);
        }
    }

    fn fire(self: &Rc<Self>, entry: TimerEntry) -> Result<(), ClockError> {
        let TimerEntry { state, callback } = entry;
        trace!(
            event = "clock.timer.fire",
            timer_id = state.id.value(),
            deadline = ?state.deadline(),
            now = ?self.now(),
            "Timer fired"
        );

        let (outcome, periodic) = match callback {
            TimerCallback::Once(callback) => {
                state.deactivate();
                (callback(), None)
            }
            TimerCallback::Periodic(mut callback) => {
                let handle = Timer::new(Rc::clone(&state), Rc::downgrade(self));
                match panic::catch_unwind(AssertUnwindSafe(|| callback(&handle))) {
                    Ok(outcome) => (outcome, Some(callback)),
                    Err(payload) => {
                        // A panicking interval keeps its place like a failing one does.
                        state.record_firing();
                        self.reinsert_periodic(state, callback);
                        panic::resume_unwind(payload);
                    }
                }
            }
        };
        state.record_firing();
        self.record(MetricsRecorder::inc_timers_fired);

        if let Some(callback) = periodic {
            self.reinsert_periodic(state, callback);
        }

        outcome.map_err(|error| self.callback_error(error))
    }

    fn reinsert_periodic(&self, state: Rc<TimerState>, callback: PeriodicCallback) {
        let Some(period) = state.period else {
            return;
        };
        // Cancelled from inside its own callback: the closure drops here.
        if !state.is_active() {
            return;
        }
        state.reschedule(period);
        self.core.borrow_mut().timers.insert(TimerEntry {
            state,
            callback: TimerCallback::Periodic(callback),
        });
    }

    fn callback_error(&self, error: anyhow::Error) -> ClockError {
        ClockError::Callback {
            elapsed: self.now(),
            error,
        }
    }

    fn record(&self, f: impl FnOnce(&MetricsRecorder)) {
        if let Some(metrics) = self.core.borrow().metrics.as_ref() {
            f(metrics);
        }
    }
}

/// Clears the advancing flag however `advance` exits.
struct AdvanceGuard<'a> {
    shared: &'a Shared,
}

impl<'a> AdvanceGuard<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let mut core = shared.core.borrow_mut();
        assert!(
            !core.advancing,
            "VirtualClock::advance called reentrantly from a callback running inside advance"
        );
        core.advancing = true;
        Self { shared }
    }
}

impl Drop for AdvanceGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut core) = self.shared.core.try_borrow_mut() {
            core.advancing = false;
        }
    }
}

/// The virtual clock engine.
///
/// One clock per scenario. Dropping it releases every pending callback and
/// task; schedulers that outlive it keep accepting work that never runs.
pub struct VirtualClock {
    shared: Rc<Shared>,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::with_config(&ClockConfig::default())
    }

    pub fn with_config(config: &ClockConfig) -> Self {
        Self {
            shared: Rc::new(Shared::new(config)),
        }
    }

    /// Records timer firings, continuations and advances to `metrics`.
    pub fn with_metrics(self, metrics: MetricsRecorder) -> Self {
        self.shared.core.borrow_mut().metrics = Some(metrics);
        self
    }

    /// A scheduling handle bound to this clock.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(Rc::clone(&self.shared))
    }

    /// Runs `body` with this clock as the active one. Work the body schedules
    /// is queued, not executed; time does not move.
    pub fn run<R>(&self, body: impl FnOnce(&Scheduler) -> R) -> R {
        let scheduler = self.scheduler();
        let _context = context::enter(scheduler.clone());
        body(&scheduler)
    }

    /// Simulated time since creation.
    pub fn elapsed(&self) -> Duration {
        self.shared.now()
    }

    /// Moves simulated time forward by `duration`, running every
    /// continuation and every timer due in the window.
    ///
    /// On return `elapsed` has grown by exactly `duration` (or further, if a
    /// callback blocked past the window with `advance_blocking`), unless a
    /// callback failed: the error is returned, `elapsed` stays at the failing
    /// callback's time, and the clock remains usable.
    ///
    /// # Panics
    /// If called from a callback that is itself running inside `advance`.
    pub fn advance(&self, duration: Duration) -> Result<(), ClockError> {
        let _advancing = AdvanceGuard::enter(&self.shared);
        let _context = context::enter(self.scheduler());

        let start = self.shared.now();
        let target = start.saturating_add(duration);
        debug!(event = "clock.advance", ?start, ?target, "Advancing virtual time");

        let mut callbacks = self.shared.drain()?;
        // A callback that blocks past `target` extends the window to the new time.
        while let Some(entry) = self.shared.pop_due(target.max(self.shared.now())) {
            self.shared.fire(entry)?;
            callbacks += 1 + self.shared.drain()?;
        }

        {
            let mut core = self.shared.core.borrow_mut();
            // A callback may have advanced past `target` with `advance_blocking`.
            core.elapsed = core.elapsed.max(target);
        }
        self.shared.record(|metrics| metrics.observe_advance(callbacks));
        trace!(event = "clock.advance.done", callbacks, "Advance complete");
        Ok(())
    }

    /// Moves simulated time forward without running anything, as a blocking
    /// synchronous computation would. Overdue timers fire on the next
    /// `advance` or flush, or later in the current `advance` when called
    /// from one of its callbacks.
    pub fn advance_blocking(&self, duration: Duration) {
        let mut core = self.shared.core.borrow_mut();
        core.elapsed = core.elapsed.saturating_add(duration);
        debug!(event = "clock.advance_blocking", elapsed = ?core.elapsed, "Blocked virtual time");
    }

    /// Drains the continuation queue without moving time.
    pub fn flush_continuations(&self) -> Result<(), ClockError> {
        let _context = context::enter(self.scheduler());
        self.shared.drain().map(|_| ())
    }

    /// [`flush_timers_with_timeout`](Self::flush_timers_with_timeout) with the
    /// configured timeout.
    pub fn flush_timers(&self, flush_periodic: bool) -> Result<(), ClockError> {
        let timeout = self.shared.core.borrow().flush_timeout;
        self.flush_timers_with_timeout(timeout, flush_periodic)
    }

    /// Advances to each next timer until no one-shot timer is pending, or
    /// with `flush_periodic` until no timer at all is pending.
    ///
    /// Fails with [`ClockError::FlushTimeout`] as soon as the next timer lies
    /// beyond `elapsed + timeout` measured at the call.
    pub fn flush_timers_with_timeout(
        &self,
        timeout: Duration,
        flush_periodic: bool,
    ) -> Result<(), ClockError> {
        let limit = self.elapsed().saturating_add(timeout);
        loop {
            self.flush_continuations()?;
            let next = {
                let core = self.shared.core.borrow();
                let pending = if flush_periodic {
                    !core.timers.is_empty()
                } else {
                    core.timers.one_shot_count() > 0
                };
                if pending {
                    core.timers.peek_deadline()
                } else {
                    None
                }
            };
            let Some(deadline) = next else {
                return Ok(());
            };
            if deadline > limit {
                return Err(ClockError::FlushTimeout { timeout });
            }
            self.advance(deadline.saturating_sub(self.elapsed()))?;
        }
    }

    /// Spawns `future` and advances from timer to timer until it completes.
    pub fn block_on<F>(&self, future: F, timeout: Duration) -> Result<F::Output, ClockError>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let handle = self.scheduler().spawn(future);
        let limit = self.elapsed().saturating_add(timeout);
        loop {
            self.flush_continuations()?;
            if let Some(output) = handle.try_take() {
                return Ok(output);
            }
            match self.next_deadline() {
                None => return Err(ClockError::Stalled),
                Some(deadline) if deadline > limit => {
                    return Err(ClockError::FlushTimeout { timeout })
                }
                Some(deadline) => self.advance(deadline.saturating_sub(self.elapsed()))?,
            }
        }
    }

    /// True iff no continuation is queued and every pending timer is periodic.
    pub fn is_quiescent(&self) -> bool {
        let mut core = self.shared.core.borrow_mut();
        self.shared.promote_ready(&mut core);
        core.continuations.is_empty() && core.timers.one_shot_count() == 0
    }

    /// Pending timers in firing order.
    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        self.shared.core.borrow().timers.snapshot()
    }

    pub fn periodic_timer_count(&self) -> usize {
        self.shared.core.borrow().timers.periodic_count()
    }

    pub fn one_shot_timer_count(&self) -> usize {
        self.shared.core.borrow().timers.one_shot_count()
    }

    pub fn continuation_count(&self) -> usize {
        let mut core = self.shared.core.borrow_mut();
        self.shared.promote_ready(&mut core);
        core.continuations.len()
    }

    /// Spawned tasks that have not completed.
    pub fn task_count(&self) -> usize {
        self.shared.core.borrow().tasks.len()
    }

    /// Deadline of the earliest pending timer.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.shared.core.borrow().timers.peek_deadline()
    }
}

impl Drop for VirtualClock {
    fn drop(&mut self) {
        // Callbacks and futures may hold schedulers or timers pointing back
        // here; drop them only after the borrow is released.
        let pending = match self.shared.core.try_borrow_mut() {
            Ok(mut core) => Some((
                core.continuations.take_all(),
                core.timers.take_all(),
                core.tasks.take_all(),
            )),
            Err(_) => None,
        };
        drop(pending);
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.borrow();
        f.debug_struct("VirtualClock")
            .field("elapsed", &core.elapsed)
            .field("advancing", &core.advancing)
            .field("continuations", &core.continuations.len())
            .field("timers", &core.timers.len())
            .field("tasks", &core.tasks.len())
            .finish()
    }
}

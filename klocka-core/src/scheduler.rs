//! ## klocka-core::scheduler
//! **The scheduling capability handed to code under simulation**
//!
//! Code that needs timers or deferred work takes a `Scheduler` instead of
//! reaching for a global timer API. Every request made through it lands in
//! the owning `VirtualClock`.

use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use crate::clock::Shared;
use crate::queue::{CallbackOutcome, Continuation};
use crate::task::{self, JoinHandle, Sleep, YieldNow};
use crate::timer::{Timer, TimerCallback};

/// Zero periods are clamped to this so a periodic timer cannot pin `advance`
/// at a single instant forever.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Clone)]
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl Scheduler {
    pub(crate) fn new(shared: Rc<Shared>) -> Self {
        Self { shared }
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.shared.now()
    }

    /// Runs `callback` once, `delay` after the current simulated time.
    pub fn set_timeout<F, O>(&self, delay: Duration, callback: F) -> Timer
    where
        F: FnOnce() -> O + 'static,
        O: CallbackOutcome,
    {
        self.shared.insert_timer(
            delay,
            None,
            TimerCallback::Once(Box::new(move || callback().into_result())),
        )
    }

    /// Runs `callback` every `period`, first at `now + period`, until the
    /// returned timer is cancelled. The callback receives its own handle.
    pub fn set_interval<F, O>(&self, period: Duration, mut callback: F) -> Timer
    where
        F: FnMut(&Timer) -> O + 'static,
        O: CallbackOutcome,
    {
        let period = period.max(MIN_PERIOD);
        self.shared.insert_timer(
            period,
            Some(period),
            TimerCallback::Periodic(Box::new(move |timer: &Timer| callback(timer).into_result())),
        )
    }

    /// Queues `callback` to run after the current synchronous work, before
    /// any timer is considered.
    pub fn schedule<F, O>(&self, callback: F)
    where
        F: FnOnce() -> O + 'static,
        O: CallbackOutcome,
    {
        self.shared.schedule(Continuation::callback(callback));
    }

    /// Same as [`Timer::cancel`].
    pub fn cancel(&self, timer: &Timer) {
        timer.cancel();
    }

    /// A future completing once simulated time reaches `now + duration`.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::new(self.clone(), duration)
    }

    /// A future that yields to other queued work once before completing.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow::default()
    }

    /// Runs `future` on this clock. Its first poll is queued as a deferred
    /// continuation; later polls follow each wake.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let (task, state) = task::join_pair(future);
        let id = self.shared.spawn(task);
        task::join_handle(id, state)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now())
            .finish_non_exhaustive()
    }
}

//! ## klocka-core::context
//! **Thread-local access to the active clock**
//!
//! `VirtualClock::run`, `advance` and the flush operations push their
//! scheduler for the duration of the call, so code that cannot be handed a
//! [`Scheduler`] still reaches the clock driving it. Scopes nest; the
//! innermost clock wins.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Duration;

use crate::error::ClockError;
use crate::queue::CallbackOutcome;
use crate::scheduler::Scheduler;
use crate::task::Sleep;
use crate::timer::Timer;

thread_local! {
    static CURRENT: RefCell<Vec<Scheduler>> = const { RefCell::new(Vec::new()) };
}

/// Pops the scheduler pushed by [`enter`] when dropped.
#[must_use]
pub(crate) struct ContextGuard {
    _not_send: PhantomData<Rc<()>>,
}

pub(crate) fn enter(scheduler: Scheduler) -> ContextGuard {
    CURRENT.with(|current| current.borrow_mut().push(scheduler));
    ContextGuard {
        _not_send: PhantomData,
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        // Dropped outside the borrow: the last scheduler may own the clock.
        let popped = CURRENT.with(|current| current.borrow_mut().pop());
        drop(popped);
    }
}

/// The scheduler of the innermost active clock on this thread.
pub fn current() -> Option<Scheduler> {
    CURRENT.with(|current| current.borrow().last().cloned())
}

pub fn try_current() -> Result<Scheduler, ClockError> {
    current().ok_or(ClockError::NoActiveClock)
}

pub fn now() -> Result<Duration, ClockError> {
    Ok(try_current()?.now())
}

pub fn set_timeout<F, O>(delay: Duration, callback: F) -> Result<Timer, ClockError>
where
    F: FnOnce() -> O + 'static,
    O: CallbackOutcome,
{
    Ok(try_current()?.set_timeout(delay, callback))
}

pub fn set_interval<F, O>(period: Duration, callback: F) -> Result<Timer, ClockError>
where
    F: FnMut(&Timer) -> O + 'static,
    O: CallbackOutcome,
{
    Ok(try_current()?.set_interval(period, callback))
}

pub fn schedule<F, O>(callback: F) -> Result<(), ClockError>
where
    F: FnOnce() -> O + 'static,
    O: CallbackOutcome,
{
    try_current()?.schedule(callback);
    Ok(())
}

pub fn sleep(duration: Duration) -> Result<Sleep, ClockError> {
    Ok(try_current()?.sleep(duration))
}

//! ## klocka-core::queue
//! **Deferred-continuation (microtask) queue**
//!
//! Strict FIFO. No priorities, no cancellation. Draining is done by the
//! clock, which pops one entry at a time so that entries pushed by a running
//! callback are picked up by the same drain.

use std::collections::VecDeque;

use crate::task::TaskId;

/// Return types a callback may have.
///
/// Plain closures return `()`; fallible ones return `Result<(), E>` and their
/// error surfaces from the `advance`/flush call that ran them.
pub trait CallbackOutcome {
    fn into_result(self) -> anyhow::Result<()>;
}

impl CallbackOutcome for () {
    #[inline]
    fn into_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E> CallbackOutcome for Result<(), E>
where
    E: Into<anyhow::Error>,
{
    #[inline]
    fn into_result(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

pub(crate) type BoxedCallback = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// One unit of deferred work.
pub(crate) enum Continuation {
    Callback(BoxedCallback),
    /// Poll a spawned task that has been woken.
    Poll(TaskId),
}

impl Continuation {
    pub(crate) fn callback<F, O>(f: F) -> Self
    where
        F: FnOnce() -> O + 'static,
        O: CallbackOutcome,
    {
        Continuation::Callback(Box::new(move || f().into_result()))
    }
}

#[derive(Default)]
pub(crate) struct ContinuationQueue {
    queue: VecDeque<Continuation>,
}

impl ContinuationQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends to the tail.
    #[inline]
    pub(crate) fn schedule(&mut self, continuation: Continuation) {
        self.queue.push_back(continuation);
    }

    /// Removes the head.
    #[inline]
    pub(crate) fn pop(&mut self) -> Option<Continuation> {
        self.queue.pop_front()
    }

    /// Puts an entry back at the head, for a drain that stops before running it.
    pub(crate) fn restore(&mut self, continuation: Continuation) {
        self.queue.push_front(continuation);
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Removes every entry; the caller drops them outside any borrow.
    pub(crate) fn take_all(&mut self) -> VecDeque<Continuation> {
        std::mem::take(&mut self.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn run(continuation: Continuation) -> anyhow::Result<()> {
        match continuation {
            Continuation::Callback(f) => f(),
            Continuation::Poll(_) => Ok(()),
        }
    }

    #[test]
    fn test_maintains_fifo_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = ContinuationQueue::new();
        for i in 0..3 {
            let log = log.clone();
            queue.schedule(Continuation::callback(move || log.borrow_mut().push(i)));
        }
        assert_eq!(queue.len(), 3);

        while let Some(c) = queue.pop() {
            run(c).unwrap();
        }
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_restore_puts_entry_back_at_head() {
        let mut queue = ContinuationQueue::new();
        queue.schedule(Continuation::Poll(TaskId(1)));
        queue.schedule(Continuation::Poll(TaskId(2)));

        let head = queue.pop().unwrap();
        queue.restore(head);
        assert!(matches!(queue.pop(), Some(Continuation::Poll(TaskId(1)))));
    }

    #[test]
    fn test_fallible_callbacks_surface_errors() {
        let ok = Continuation::callback(|| Ok::<(), std::io::Error>(()));
        let failing = Continuation::callback(|| -> anyhow::Result<()> { Err(anyhow::anyhow!("boom")) });
        assert!(run(ok).is_ok());
        assert_eq!(run(failing).unwrap_err().to_string(), "boom");
    }
}

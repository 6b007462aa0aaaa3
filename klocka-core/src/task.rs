//! ## klocka-core::task
//! **Futures on virtual time**
//!
//! Spawned futures are polled as deferred continuations. A waker never
//! touches the clock directly: it pushes the task id onto a lock-free ready
//! queue, and the clock moves ready ids into the continuation queue in wake
//! order each time it pops the next continuation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crossbeam::queue::SegQueue;
use futures::task::ArcWake;

use crate::scheduler::Scheduler;
use crate::timer::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

pub(crate) type ReadyQueue = Arc<SegQueue<TaskId>>;
pub(crate) type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

struct TaskWaker {
    id: TaskId,
    ready: ReadyQueue,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.ready.push(arc_self.id);
    }
}

struct TaskSlot {
    /// `None` while the task is being polled.
    future: Option<LocalFuture>,
    waker: Waker,
    /// Already sitting in the continuation queue.
    queued: bool,
}

#[derive(Default)]
pub(crate) struct TaskSet {
    slots: HashMap<TaskId, TaskSlot>,
    next_id: u64,
}

impl TaskSet {
    /// Registers the future and wakes it once so its first poll is queued.
    pub(crate) fn insert(&mut self, future: LocalFuture, ready: &ReadyQueue) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;

        let waker = futures::task::waker(Arc::new(TaskWaker {
            id,
            ready: Arc::clone(ready),
        }));
        waker.wake_by_ref();
        self.slots.insert(
            id,
            TaskSlot {
                future: Some(future),
                waker,
                queued: false,
            },
        );
        id
    }

    /// Returns true if the task should be pushed onto the continuation queue.
    pub(crate) fn mark_queued(&mut self, id: TaskId) -> bool {
        match self.slots.get_mut(&id) {
            Some(slot) if !slot.queued => {
                slot.queued = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn begin_poll(&mut self, id: TaskId) -> Option<(LocalFuture, Waker)> {
        let slot = self.slots.get_mut(&id)?;
        slot.queued = false;
        let future = slot.future.take()?;
        Some((future, slot.waker.clone()))
    }

    pub(crate) fn finish_poll(&mut self, id: TaskId, future: LocalFuture) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.future = Some(future);
        }
    }

    pub(crate) fn remove(&mut self, id: TaskId) -> Option<LocalFuture> {
        self.slots.remove(&id).and_then(|slot| slot.future)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Empties the set; the caller drops the futures outside any borrow.
    pub(crate) fn take_all(&mut self) -> Vec<LocalFuture> {
        self.slots
            .drain()
            .filter_map(|(_, slot)| slot.future)
            .collect()
    }
}

pub(crate) struct JoinState<T> {
    output: Option<T>,
    finished: bool,
    waker: Option<Waker>,
}

/// Handle to a spawned task's output.
///
/// Awaiting it from another task on the same clock yields the output; test
/// drivers outside any task use [`JoinHandle::try_take`].
pub struct JoinHandle<T> {
    id: TaskId,
    state: Rc<RefCell<JoinState<T>>>,
}

impl<T> JoinHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.state.borrow().finished
    }

    /// Takes the output if the task has completed and nobody took it yet.
    pub fn try_take(&self) -> Option<T> {
        self.state.borrow_mut().output.take()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.state.borrow_mut();
        if let Some(output) = state.output.take() {
            return Poll::Ready(output);
        }
        assert!(
            !state.finished,
            "JoinHandle polled after its output was taken"
        );
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Wraps `future` so its output lands in the returned handle's state.
pub(crate) fn join_pair<F>(future: F) -> (LocalFuture, Rc<RefCell<JoinState<F::Output>>>)
where
    F: Future + 'static,
    F::Output: 'static,
{
    let state = Rc::new(RefCell::new(JoinState {
        output: None,
        finished: false,
        waker: None,
    }));
    let completion = Rc::clone(&state);
    let task = async move {
        let output = future.await;
        let waker = {
            let mut state = completion.borrow_mut();
            state.output = Some(output);
            state.finished = true;
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    };
    (Box::pin(task), state)
}

pub(crate) fn join_handle<T>(id: TaskId, state: Rc<RefCell<JoinState<T>>>) -> JoinHandle<T> {
    JoinHandle { id, state }
}

/// Future returned by [`Scheduler::sleep`].
///
/// Completes once virtual time reaches its deadline. Dropping it before then
/// cancels the underlying timer.
pub struct Sleep {
    scheduler: Scheduler,
    deadline: Duration,
    timer: Option<Timer>,
    waker: Rc<RefCell<Option<Waker>>>,
}

impl Sleep {
    pub(crate) fn new(scheduler: Scheduler, duration: Duration) -> Self {
        let deadline = scheduler.now().saturating_add(duration);
        Self {
            scheduler,
            deadline,
            timer: None,
            waker: Rc::new(RefCell::new(None)),
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let now = self.scheduler.now();
        if now >= self.deadline {
            if let Some(timer) = self.timer.take() {
                timer.cancel();
            }
            return Poll::Ready(());
        }

        *self.waker.borrow_mut() = Some(cx.waker().clone());
        if self.timer.is_none() {
            let slot = Rc::clone(&self.waker);
            let timer = self.scheduler.set_timeout(self.deadline - now, move || {
                let waker = slot.borrow_mut().take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
            self.timer = Some(timer);
        }
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

impl fmt::Debug for Sleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sleep")
            .field("deadline", &self.deadline)
            .field("registered", &self.timer.is_some())
            .finish()
    }
}

/// Future returned by [`Scheduler::yield_now`]: pending exactly once.
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

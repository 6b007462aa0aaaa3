use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use proptest::prelude::*;

use klocka_core::prelude::*;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn ms(m: u64) -> Duration {
    Duration::from_millis(m)
}

type Log = Rc<RefCell<Vec<(&'static str, Duration)>>>;

fn record(log: &Log, scheduler: &Scheduler, label: &'static str) -> impl FnOnce() + 'static {
    let log = Rc::clone(log);
    let scheduler = scheduler.clone();
    move || log.borrow_mut().push((label, scheduler.now()))
}

#[test]
fn test_monotonic_elapsed() {
    let clock = VirtualClock::new();
    let mut expected = Duration::ZERO;
    for step in [0, 5, 0, 120, 1, 3_600_000] {
        let before = clock.elapsed();
        clock.advance(ms(step)).unwrap();
        expected += ms(step);
        assert!(clock.elapsed() >= before);
        assert_eq!(clock.elapsed(), expected);
    }
}

#[test]
fn test_continuations_run_in_fifo_order() {
    let clock = VirtualClock::new();
    let log: Log = Rc::default();
    clock.run(|scheduler| {
        for label in ["A", "B", "C"] {
            scheduler.schedule(record(&log, scheduler, label));
        }
    });

    clock.advance(Duration::ZERO).unwrap();
    let labels: Vec<_> = log.borrow().iter().map(|(label, _)| *label).collect();
    assert_eq!(labels, ["A", "B", "C"]);
}

#[test]
fn test_timers_fire_in_deadline_order() {
    for reversed in [false, true] {
        let clock = VirtualClock::new();
        let log: Log = Rc::default();
        clock.run(|scheduler| {
            let mut timers = vec![("10ms", ms(10)), ("5ms", ms(5))];
            if reversed {
                timers.reverse();
            }
            for (label, delay) in timers {
                scheduler.set_timeout(delay, record(&log, scheduler, label));
            }
        });

        clock.advance(ms(10)).unwrap();
        assert_eq!(*log.borrow(), vec![("5ms", ms(5)), ("10ms", ms(10))]);
    }
}

#[test]
fn test_continuations_run_before_timers_and_between_them() {
    let clock = VirtualClock::new();
    let log: Log = Rc::default();
    clock.run(|scheduler| {
        let inner_log = Rc::clone(&log);
        let inner = scheduler.clone();
        scheduler.set_timeout(ms(1), move || {
            inner_log.borrow_mut().push(("timer-1", inner.now()));
            inner.schedule(record(&inner_log, &inner, "from-timer-1"));
        });
        scheduler.set_timeout(ms(1), record(&log, scheduler, "timer-2"));
        scheduler.schedule(record(&log, scheduler, "initial"));
    });

    clock.advance(ms(1)).unwrap();
    let labels: Vec<_> = log.borrow().iter().map(|(label, _)| *label).collect();
    assert_eq!(labels, ["initial", "timer-1", "from-timer-1", "timer-2"]);
}

#[test]
fn test_periodic_timer_does_not_drift() {
    let clock = VirtualClock::new();
    let deadlines = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&deadlines);
    let timer = clock.run(|scheduler| {
        let scheduler = scheduler.clone();
        scheduler.clone().set_interval(secs(1), move |_| {
            sink.borrow_mut().push(scheduler.now());
        })
    });

    clock.advance(secs(10)).unwrap();
    let expected: Vec<_> = (1..=10).map(secs).collect();
    assert_eq!(*deadlines.borrow(), expected);
    assert_eq!(timer.tick(), 10);
    assert_eq!(timer.deadline(), secs(11));
}

#[test]
fn test_quiescence() {
    let clock = VirtualClock::new();
    let scheduler = clock.scheduler();
    scheduler.set_timeout(secs(1), || ());
    assert!(!clock.is_quiescent());

    clock.advance(secs(1)).unwrap();
    assert!(clock.is_quiescent());

    let periodic_only = VirtualClock::new();
    periodic_only.scheduler().set_interval(secs(1), |_| ());
    assert!(periodic_only.is_quiescent());
}

#[test]
#[should_panic(expected = "reentrant")]
fn test_reentrant_advance_panics() {
    let clock = Rc::new(VirtualClock::new());
    let inner = Rc::clone(&clock);
    clock
        .scheduler()
        .set_timeout(secs(1), move || inner.advance(secs(1)));

    let _ = clock.advance(secs(2));
}

#[test]
fn test_reentrant_panic_leaves_clock_usable() {
    let clock = Rc::new(VirtualClock::new());
    let scheduler = clock.scheduler();
    let log: Log = Rc::default();

    let inner = Rc::clone(&clock);
    let queued = record(&log, &scheduler, "continuation");
    let nested = scheduler.clone();
    scheduler.set_timeout(secs(1), move || {
        nested.schedule(queued);
        let _ = inner.advance(secs(1));
    });
    let ticks = Rc::clone(&log);
    let tick_scheduler = scheduler.clone();
    let interval = scheduler.set_interval(secs(1), move |_| {
        ticks.borrow_mut().push(("tick", tick_scheduler.now()));
    });
    scheduler.set_timeout(secs(2), record(&log, &scheduler, "late"));

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| clock.advance(secs(5))));
    assert!(result.is_err());
    assert_eq!(clock.elapsed(), secs(1));
    assert_eq!(clock.continuation_count(), 1);
    assert_eq!(clock.periodic_timer_count(), 1);
    assert_eq!(clock.one_shot_timer_count(), 1);

    clock.advance(secs(2)).unwrap();
    assert_eq!(clock.elapsed(), secs(3));
    assert_eq!(
        *log.borrow(),
        vec![
            ("continuation", secs(1)),
            ("tick", secs(1)),
            ("late", secs(2)),
            ("tick", secs(2)),
            ("tick", secs(3)),
        ]
    );
    assert!(interval.is_active());
    assert_eq!(clock.next_deadline(), Some(secs(4)));
}

#[test]
fn test_cancel_is_idempotent() {
    let clock = VirtualClock::new();
    let fired = Rc::new(Cell::new(0u32));
    let scheduler = clock.scheduler();

    let counter = Rc::clone(&fired);
    let cancelled = scheduler.set_timeout(secs(1), move || counter.set(counter.get() + 1));
    cancelled.cancel();
    scheduler.cancel(&cancelled);
    assert_eq!(clock.one_shot_timer_count(), 0);

    let counter = Rc::clone(&fired);
    let one_shot = scheduler.set_timeout(secs(1), move || counter.set(counter.get() + 1));
    clock.advance(secs(1)).unwrap();
    one_shot.cancel();
    one_shot.cancel();

    assert_eq!(fired.get(), 1);
    assert!(!one_shot.is_active());
    assert!(clock.is_quiescent());
}

#[test]
fn test_cancel_after_clock_dropped_is_noop() {
    let clock = VirtualClock::new();
    let timer = clock.scheduler().set_timeout(secs(1), || ());
    drop(clock);
    timer.cancel();
    assert!(!timer.is_active());
}

#[test]
fn test_partial_window_firing() {
    let clock = VirtualClock::new();
    let fired = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&fired);
    clock
        .scheduler()
        .set_timeout(secs(15), move || counter.set(counter.get() + 1));

    clock.advance(secs(10)).unwrap();
    assert_eq!(fired.get(), 0);
    assert_eq!(clock.next_deadline(), Some(secs(15)));

    clock.advance(secs(5)).unwrap();
    assert_eq!(fired.get(), 1);
    assert_eq!(clock.elapsed(), secs(15));
}

#[test]
fn test_callback_error_leaves_clock_reusable() {
    let clock = VirtualClock::new();
    let scheduler = clock.scheduler();
    scheduler.set_timeout(secs(1), || -> Result<(), std::io::Error> {
        Err(std::io::Error::other("disk full"))
    });

    let err = clock.advance(secs(2)).unwrap_err();
    assert!(err.to_string().contains("disk full"));

    let fired = Rc::new(Cell::new(false));
    let flag = Rc::clone(&fired);
    scheduler.set_timeout(secs(1), move || flag.set(true));
    clock.advance(secs(2)).unwrap();
    assert!(fired.get());
}

#[test]
fn test_pending_timers_snapshot() {
    let clock = VirtualClock::new();
    let scheduler = clock.scheduler();
    let late = scheduler.set_timeout(secs(3), || ());
    let periodic = scheduler.set_interval(secs(2), |_| ());
    let early = scheduler.set_timeout(secs(1), || ());

    let ids: Vec<_> = clock.pending_timers().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![early.id(), periodic.id(), late.id()]);
    assert_eq!(clock.periodic_timer_count(), 1);
    assert_eq!(clock.one_shot_timer_count(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_timers_fire_in_order_and_never_early(
        delays in prop::collection::vec(0u64..500, 1..40),
        steps in prop::collection::vec(0u64..200, 1..10),
    ) {
        let clock = VirtualClock::new();
        let scheduler = clock.scheduler();
        let fired = Rc::new(RefCell::new(Vec::new()));
        for (index, delay) in delays.iter().enumerate() {
            let sink = Rc::clone(&fired);
            let now = scheduler.clone();
            let deadline = ms(*delay);
            scheduler.set_timeout(deadline, move || {
                sink.borrow_mut().push((deadline, index, now.now()));
            });
        }

        let mut total = Duration::ZERO;
        for step in &steps {
            clock.advance(ms(*step)).unwrap();
            total += ms(*step);
            prop_assert_eq!(clock.elapsed(), total);
        }

        let fired = fired.borrow();
        let expected = delays.iter().filter(|d| ms(**d) <= total).count();
        prop_assert_eq!(fired.len(), expected);
        for pair in fired.windows(2) {
            prop_assert!((pair[0].0, pair[0].1) < (pair[1].0, pair[1].1));
            prop_assert!(pair[0].2 <= pair[1].2);
        }
        for (deadline, _, observed) in fired.iter() {
            prop_assert!(observed >= deadline);
        }
    }
}

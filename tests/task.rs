mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use promio::error::{Error, ErrorKind};
use promio::event::{Idle, Loop};
use promio::task::make_task;

/// Keep the loop alive until both counters are non-zero, the way
/// callers waiting on a task have to: an in-flight worker holds no
/// loop handle of its own.
fn keep_alive(lp: &Loop, first: &Arc<AtomicUsize>, second: &Arc<AtomicUsize>) {
    let idle = Idle::new(lp);
    let handle = idle.clone();
    let first = first.clone();
    let second = second.clone();
    idle.start(move || {
        if first.load(Ordering::SeqCst) > 0 && second.load(Ordering::SeqCst) > 0 {
            handle.stop();
        }
    });
}

#[test]
fn test_execute_void_void() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let task_executed = Arc::new(AtomicUsize::new(0));
    let then_executed = Arc::new(AtomicUsize::new(0));
    let loop_thread = thread::current().id();
    keep_alive(&lp, &task_executed, &then_executed);

    let task = {
        let task_executed = task_executed.clone();
        make_task(&lp, move |()| {
            thread::sleep(support::millis(10));
            task_executed.fetch_add(1, Ordering::SeqCst);
            assert_ne!(loop_thread, thread::current().id());
            Ok(())
        })
    };

    {
        let then_executed = then_executed.clone();
        task.call(()).then(move |()| {
            then_executed.fetch_add(1, Ordering::SeqCst);
            assert_eq!(loop_thread, thread::current().id());
        });
    }

    assert_eq!(0, task_executed.load(Ordering::SeqCst));
    assert_eq!(0, then_executed.load(Ordering::SeqCst));
    lp.run().unwrap();
    assert_eq!(1, task_executed.load(Ordering::SeqCst));
    assert_eq!(1, then_executed.load(Ordering::SeqCst));
}

#[test]
fn test_execute_void_int() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let task_executed = Arc::new(AtomicUsize::new(0));
    let then_executed = Arc::new(AtomicUsize::new(0));
    let loop_thread = thread::current().id();
    keep_alive(&lp, &task_executed, &then_executed);

    let task = {
        let task_executed = task_executed.clone();
        make_task(&lp, move |i: i32| {
            thread::sleep(support::millis(10));
            task_executed.fetch_add(1, Ordering::SeqCst);
            assert_ne!(loop_thread, thread::current().id());
            assert_eq!(4, i);
            Ok(())
        })
    };

    {
        let then_executed = then_executed.clone();
        task.call(4).then(move |()| {
            then_executed.fetch_add(1, Ordering::SeqCst);
            assert_eq!(loop_thread, thread::current().id());
        });
    }

    lp.run().unwrap();
    assert_eq!(1, task_executed.load(Ordering::SeqCst));
    assert_eq!(1, then_executed.load(Ordering::SeqCst));
}

#[test]
fn test_execute_int_void() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let task_executed = Arc::new(AtomicUsize::new(0));
    let then_executed = Arc::new(AtomicUsize::new(0));
    let loop_thread = thread::current().id();
    keep_alive(&lp, &task_executed, &then_executed);

    let task = {
        let task_executed = task_executed.clone();
        make_task(&lp, move |()| {
            thread::sleep(support::millis(10));
            task_executed.fetch_add(1, Ordering::SeqCst);
            assert_ne!(loop_thread, thread::current().id());
            Ok(8)
        })
    };

    {
        let then_executed = then_executed.clone();
        task.call(()).then(move |res: i32| {
            then_executed.fetch_add(1, Ordering::SeqCst);
            assert_eq!(loop_thread, thread::current().id());
            assert_eq!(8, res);
        });
    }

    lp.run().unwrap();
    assert_eq!(1, task_executed.load(Ordering::SeqCst));
    assert_eq!(1, then_executed.load(Ordering::SeqCst));
}

#[test]
fn test_execute_int_int() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let task_executed = Arc::new(AtomicUsize::new(0));
    let then_executed = Arc::new(AtomicUsize::new(0));
    let loop_thread = thread::current().id();
    keep_alive(&lp, &task_executed, &then_executed);

    let task = {
        let task_executed = task_executed.clone();
        make_task(&lp, move |i: i32| {
            thread::sleep(support::millis(10));
            task_executed.fetch_add(1, Ordering::SeqCst);
            assert_ne!(loop_thread, thread::current().id());
            assert_eq!(4, i);
            Ok(i * 2)
        })
    };

    {
        let then_executed = then_executed.clone();
        task.call(4).then(move |res| {
            then_executed.fetch_add(1, Ordering::SeqCst);
            assert_eq!(loop_thread, thread::current().id());
            assert_eq!(8, res);
        });
    }

    assert_eq!(0, task_executed.load(Ordering::SeqCst));
    assert_eq!(0, then_executed.load(Ordering::SeqCst));
    lp.run().unwrap();
    assert_eq!(1, task_executed.load(Ordering::SeqCst));
    assert_eq!(1, then_executed.load(Ordering::SeqCst));
}

#[test]
fn test_concurrent_invocations_are_independent() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let task_executed = Arc::new(AtomicUsize::new(0));
    let then_executed = Arc::new(AtomicUsize::new(0));
    keep_alive(&lp, &task_executed, &then_executed);

    let task = {
        let task_executed = task_executed.clone();
        make_task(&lp, move |i: i32| {
            task_executed.fetch_add(1, Ordering::SeqCst);
            Ok(i * i)
        })
    };

    for i in 1..=4 {
        let then_executed = then_executed.clone();
        task.call(i).then(move |res| {
            assert_eq!(i * i, res);
            then_executed.fetch_add(1, Ordering::SeqCst);
        });
    }

    lp.run().unwrap();
    assert_eq!(4, task_executed.load(Ordering::SeqCst));
    assert_eq!(4, then_executed.load(Ordering::SeqCst));
}

#[test]
fn test_body_error_rejects_future() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let task_executed = Arc::new(AtomicUsize::new(0));
    let then_executed = Arc::new(AtomicUsize::new(0));
    keep_alive(&lp, &task_executed, &then_executed);

    let task = {
        let task_executed = task_executed.clone();
        make_task(&lp, move |(): ()| -> Result<i32, Error> {
            task_executed.fetch_add(1, Ordering::SeqCst);
            Err(Error::stream(42, "deliberate failure"))
        })
    };

    {
        let then_executed = then_executed.clone();
        task.call(()).then_or_else(
            |_| -> Result<(), Error> {
                panic!("task future was resolved, not rejected");
            },
            move |err| {
                assert_eq!(42, err.code());
                assert_eq!("deliberate failure", err.message());
                then_executed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );
    }

    lp.run().unwrap();
    assert_eq!(1, then_executed.load(Ordering::SeqCst));
}

#[test]
fn test_body_panic_rejects_future() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let task_executed = Arc::new(AtomicUsize::new(1));
    let then_executed = Arc::new(AtomicUsize::new(0));
    keep_alive(&lp, &task_executed, &then_executed);

    let task = make_task(&lp, move |(): ()| -> Result<i32, Error> {
        panic!("exploded");
    });

    {
        let then_executed = then_executed.clone();
        task.call(()).then_or_else(
            |_| -> Result<(), Error> {
                panic!("task future was resolved, not rejected");
            },
            move |err| {
                assert_eq!(ErrorKind::Worker, err.kind());
                assert_eq!("exploded", err.message());
                then_executed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );
    }

    lp.run().unwrap();
    assert_eq!(1, then_executed.load(Ordering::SeqCst));
}

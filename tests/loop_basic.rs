mod support;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use promio::event::{Idle, Loop};

#[test]
fn test_empty_loop_returns_immediately() {
    support::init_log();
    let lp = Loop::new().unwrap();
    lp.run().unwrap();
}

#[test]
fn test_idle_loop() {
    support::init_log();
    const TICKS: usize = 10_000;

    let lp = Loop::new().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let idle = Idle::new(&lp);

    {
        let idle = idle.clone();
        let counter = counter.clone();
        idle.clone().start(move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 >= TICKS {
                idle.stop();
            }
        });
    }

    assert_eq!(0, counter.load(Ordering::SeqCst));
    lp.run().unwrap();
    assert_eq!(TICKS, counter.load(Ordering::SeqCst));
}

#[test]
fn test_post() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let executed = Arc::new(AtomicUsize::new(0));

    {
        let executed = executed.clone();
        lp.post(move || {
            executed.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert_eq!(0, executed.load(Ordering::SeqCst));
    lp.run().unwrap();
    assert_eq!(1, executed.load(Ordering::SeqCst));
}

#[test]
fn test_post_panic_is_reraised() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let executed = Arc::new(AtomicUsize::new(0));

    {
        let executed = executed.clone();
        lp.post(move || {
            executed.fetch_add(1, Ordering::SeqCst);
            panic!("foobar");
        });
    }

    assert_eq!(0, executed.load(Ordering::SeqCst));
    let payload = catch_unwind(AssertUnwindSafe(|| lp.run())).unwrap_err();
    assert_eq!(Some(&"foobar"), payload.downcast_ref::<&str>());
    assert_eq!(1, executed.load(Ordering::SeqCst));
}

#[test]
fn test_post_from_thread() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let executed = Arc::new(AtomicUsize::new(0));
    let loop_thread = thread::current().id();

    let idle = Idle::new(&lp);
    {
        let idle = idle.clone();
        let executed = executed.clone();
        idle.clone().start(move || {
            if executed.load(Ordering::SeqCst) > 0 {
                idle.stop();
            }
        });
    }

    let background = {
        let lp = lp.clone();
        let executed = executed.clone();
        thread::spawn(move || {
            assert_ne!(loop_thread, thread::current().id());
            thread::sleep(support::millis(10));

            lp.post(move || {
                assert_eq!(loop_thread, thread::current().id());
                executed.fetch_add(1, Ordering::SeqCst);
            });
        })
    };

    assert_eq!(0, executed.load(Ordering::SeqCst));
    lp.run().unwrap();
    assert_eq!(1, executed.load(Ordering::SeqCst));

    background.join().unwrap();
}

#[test]
fn test_posts_run_in_order() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    for i in 0..16 {
        let order = order.clone();
        lp.post(move || {
            order.lock().unwrap().push(i);
        });
    }

    lp.run().unwrap();
    assert_eq!((0..16).collect::<Vec<_>>(), *order.lock().unwrap());
}

mod support;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use promio::error::{Error, ErrorKind};
use promio::event::{wait, Loop, Timeout};

#[test]
fn test_no_delay() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let resolved = Arc::new(AtomicBool::new(false));

    let timeout = Timeout::new(&lp);
    let start = Instant::now();
    {
        let resolved = resolved.clone();
        timeout.start(support::millis(0)).then(move |()| {
            assert!(start.elapsed() < support::millis(25));
            resolved.store(true, Ordering::SeqCst);
        });
    }
    assert!(!resolved.load(Ordering::SeqCst));

    lp.run().unwrap();
    assert!(resolved.load(Ordering::SeqCst));
}

#[test]
fn test_short_delay() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let resolved = Arc::new(AtomicBool::new(false));

    let timeout = Timeout::new(&lp);
    let start = Instant::now();
    {
        let resolved = resolved.clone();
        timeout.start(support::millis(25)).then(move |()| {
            let elapsed = start.elapsed();
            assert!(
                elapsed >= support::millis(22),
                "timer fired early: {:?}",
                elapsed
            );
            assert!(
                elapsed <= support::millis(28),
                "timer fired late: {:?}",
                elapsed
            );
            resolved.store(true, Ordering::SeqCst);
        });
    }
    assert!(!resolved.load(Ordering::SeqCst));

    lp.run().unwrap();
    assert!(resolved.load(Ordering::SeqCst));
}

#[test]
fn test_repeat() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let resolved = Arc::new(AtomicBool::new(false));
    let call_count = Arc::new(AtomicUsize::new(0));

    let interval = support::millis(5);
    let discrepancy = support::millis(3);

    let timeout = Timeout::new(&lp);
    let start = Instant::now();
    let future = {
        let call_count = call_count.clone();
        timeout.repeat(interval, move |repeat_timeout| {
            let count = call_count.fetch_add(1, Ordering::SeqCst) + 1;
            let elapsed = start.elapsed();

            assert!(
                elapsed >= (interval - discrepancy) * count as u32,
                "call {} arrived early: {:?}",
                count,
                elapsed
            );

            assert!(count < 5, "repeat kept firing after stop");
            if count == 4 {
                repeat_timeout.stop();
            }
        })
    };
    {
        let resolved = resolved.clone();
        future.then(move |()| {
            assert!(!resolved.swap(true, Ordering::SeqCst));
        });
    }
    assert!(!resolved.load(Ordering::SeqCst));
    assert_eq!(0, call_count.load(Ordering::SeqCst));

    lp.run().unwrap();
    assert_eq!(4, call_count.load(Ordering::SeqCst));
    assert!(resolved.load(Ordering::SeqCst));
}

#[test]
fn test_stop_rejects_pending_start() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let rejected = Arc::new(AtomicBool::new(false));

    let timeout = Timeout::new(&lp);
    {
        let rejected = rejected.clone();
        timeout.start(support::millis(125)).then_or_else(
            |()| -> Result<(), Error> {
                panic!("timeout promise was resolved, not rejected");
            },
            move |err| {
                assert_eq!(ErrorKind::Cancelled, err.kind());
                assert_eq!(1, err.code());
                assert_eq!("Timeout cancelled.", err.message());
                rejected.store(true, Ordering::SeqCst);
                Ok(())
            },
        );
    }
    assert!(!rejected.load(Ordering::SeqCst));

    {
        let timeout = timeout.clone();
        wait(&lp, support::millis(25)).then(move |()| {
            timeout.stop();
        });
    }

    lp.run().unwrap();
    assert!(rejected.load(Ordering::SeqCst));
}

#[test]
fn test_wait_resolves() {
    support::init_log();
    let lp = Loop::new().unwrap();
    let resolved = Arc::new(AtomicBool::new(false));

    let start = Instant::now();
    {
        let resolved = resolved.clone();
        wait(&lp, support::millis(10)).then(move |()| {
            assert!(start.elapsed() >= support::millis(9));
            resolved.store(true, Ordering::SeqCst);
        });
    }

    lp.run().unwrap();
    assert!(resolved.load(Ordering::SeqCst));
}

//! One-shot and repeating timers.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::event::event_loop::Loop;
use crate::event::promise::{Future, Promise};

enum TimerState {
    Idle,
    Once {
        promise: Promise<()>,
        gen: u64,
    },
    Repeat {
        interval: Duration,
        cb: Box<dyn FnMut(&Timeout) + Send>,
        promise: Promise<()>,
        gen: u64,
    },
    // A repeat callback is currently executing; the callback itself
    // is held by the fire path.
    Running {
        interval: Duration,
        promise: Option<Promise<()>>,
        gen: u64,
        stopped: bool,
    },
}

pub(crate) struct TimerShared {
    state: Mutex<TimerState>,
    gen: AtomicU64,
}

/// A timer running on an event loop.
///
/// `start` arms a one-shot delay whose future resolves when the
/// delay elapses; stopping it first rejects the future with a
/// cancellation error. `repeat` invokes a callback on an interval
/// until stopped, at which point the repeat future resolves.
#[derive(Clone)]
pub struct Timeout {
    lp: Loop,
    shared: Arc<TimerShared>,
}

impl Timeout {
    /// Create a timer attached to the given loop.
    pub fn new(lp: &Loop) -> Timeout {
        Timeout {
            lp: lp.clone(),
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState::Idle),
                gen: AtomicU64::new(0),
            }),
        }
    }

    /// Arm a one-shot delay.
    ///
    /// The returned future resolves on the loop thread once `delay`
    /// has elapsed, or rejects with code 1, `"Timeout cancelled."`
    /// if [`Timeout::stop`] runs first.
    ///
    /// # Panics
    ///
    /// Panics if the timer is already armed.
    pub fn start(&self, delay: Duration) -> Future<()> {
        let gen = self.shared.gen.fetch_add(1, Ordering::SeqCst) + 1;
        let promise = Promise::new();
        let future = promise.future();

        {
            let mut state = self.shared.state.lock().unwrap();
            if !matches!(*state, TimerState::Idle) {
                drop(state);
                panic!("timeout is already armed");
            }
            *state = TimerState::Once { promise, gen };
        }

        self.lp.add_timer(Instant::now() + delay, self.shared.clone(), gen);
        self.lp.activity_started();
        future
    }

    /// Arm a repeating timer.
    ///
    /// `cb` runs once per elapsed `interval` and receives this
    /// timer, so it can stop the repetition; the returned future
    /// resolves when the timer is stopped.
    ///
    /// # Panics
    ///
    /// Panics if the timer is already armed.
    pub fn repeat<F>(&self, interval: Duration, cb: F) -> Future<()>
    where
        F: FnMut(&Timeout) + Send + 'static,
    {
        let gen = self.shared.gen.fetch_add(1, Ordering::SeqCst) + 1;
        let promise = Promise::new();
        let future = promise.future();

        {
            let mut state = self.shared.state.lock().unwrap();
            if !matches!(*state, TimerState::Idle) {
                drop(state);
                panic!("timeout is already armed");
            }
            *state = TimerState::Repeat {
                interval,
                cb: Box::new(cb),
                promise,
                gen,
            };
        }

        self.lp
            .add_timer(Instant::now() + interval, self.shared.clone(), gen);
        self.lp.activity_started();
        future
    }

    /// Stop the timer.
    ///
    /// A pending one-shot rejects its future with the cancellation
    /// error; an active repeat resolves its future. Stopping an
    /// unarmed timer does nothing.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock().unwrap();
        match mem::replace(&mut *state, TimerState::Idle) {
            TimerState::Idle => {}
            TimerState::Once { promise, .. } => {
                drop(state);
                self.lp.activity_finished();
                promise.reject(Error::cancelled());
            }
            TimerState::Repeat { promise, .. } => {
                drop(state);
                self.lp.activity_finished();
                promise.resolve(());
            }
            TimerState::Running {
                interval,
                promise,
                gen,
                ..
            } => {
                // Called from inside the repeat callback; leave the
                // marker in place so the fire path sees the stop.
                *state = TimerState::Running {
                    interval,
                    promise: None,
                    gen,
                    stopped: true,
                };
                drop(state);
                self.lp.activity_finished();
                if let Some(promise) = promise {
                    promise.resolve(());
                }
            }
        }
    }
}

/// Fire one due heap entry against its timer.
pub(crate) fn fire(shared: &Arc<TimerShared>, gen: u64, deadline: Instant, lp: &Loop) {
    let mut state = shared.state.lock().unwrap();

    let current_gen = match &*state {
        TimerState::Idle => return,
        TimerState::Once { gen, .. } => *gen,
        TimerState::Repeat { gen, .. } => *gen,
        TimerState::Running { gen, .. } => *gen,
    };
    if current_gen != gen {
        // Stale entry from a stopped or re-armed timer.
        return;
    }

    match mem::replace(&mut *state, TimerState::Idle) {
        TimerState::Once { promise, .. } => {
            drop(state);
            log::trace!("one-shot timer fired");
            lp.activity_finished();
            promise.resolve(());
        }
        TimerState::Repeat {
            interval,
            mut cb,
            promise,
            gen,
        } => {
            *state = TimerState::Running {
                interval,
                promise: Some(promise),
                gen,
                stopped: false,
            };
            drop(state);

            let handle = Timeout {
                lp: lp.clone(),
                shared: shared.clone(),
            };
            cb(&handle);

            let mut state = shared.state.lock().unwrap();
            match mem::replace(&mut *state, TimerState::Idle) {
                TimerState::Running { stopped: true, .. } => {
                    // stop() already settled the future.
                }
                TimerState::Running {
                    interval,
                    promise,
                    gen,
                    stopped: false,
                } => {
                    *state = TimerState::Repeat {
                        interval,
                        cb,
                        promise: promise.expect("running repeat lost its promise"),
                        gen,
                    };
                    drop(state);
                    // Re-arm from the previous deadline so repeats
                    // do not drift.
                    lp.add_timer(deadline + interval, shared.clone(), gen);
                }
                other => *state = other,
            }
        }
        other => *state = other,
    }
}

/// Wait for the given delay on the loop.
///
/// Equivalent to arming a one-shot [`Timeout`] that keeps itself
/// alive until it fires.
pub fn wait(lp: &Loop, delay: Duration) -> Future<()> {
    Timeout::new(lp).start(delay)
}

//! Idle handles: callbacks that run once per loop iteration.

use std::sync::{Arc, Mutex};

use crate::event::event_loop::Loop;

pub(crate) struct IdleShared {
    cb: Mutex<Option<Box<dyn FnMut() + Send>>>,
    key: Mutex<Option<usize>>,
}

/// A callback invoked on every iteration of the loop.
///
/// A started idle keeps the loop alive and busy: while any idle is
/// active the loop does not block waiting for I/O. Typical use is
/// keeping the loop running until some out-of-band condition holds,
/// then calling [`Idle::stop`] from inside the callback.
#[derive(Clone)]
pub struct Idle {
    lp: Loop,
    shared: Arc<IdleShared>,
}

impl Idle {
    /// Create an idle handle attached to the given loop.
    pub fn new(lp: &Loop) -> Idle {
        Idle {
            lp: lp.clone(),
            shared: Arc::new(IdleShared {
                cb: Mutex::new(None),
                key: Mutex::new(None),
            }),
        }
    }

    /// Start invoking `cb` once per loop iteration.
    ///
    /// # Panics
    ///
    /// Panics if the idle is already started.
    pub fn start<F: FnMut() + Send + 'static>(&self, cb: F) {
        let mut key = self.shared.key.lock().unwrap();
        if key.is_some() {
            drop(key);
            panic!("idle is already started");
        }
        *self.shared.cb.lock().unwrap() = Some(Box::new(cb));
        *key = Some(self.lp.add_idle(self.shared.clone()));
        drop(key);
        self.lp.activity_started();
    }

    /// Stop the idle. Safe to call from inside the callback.
    pub fn stop(&self) {
        let key = self.shared.key.lock().unwrap().take();
        if let Some(key) = key {
            self.lp.remove_idle(key);
            self.shared.cb.lock().unwrap().take();
            self.lp.activity_finished();
        }
    }
}

/// Run one idle callback, honoring a stop issued from inside it.
pub(crate) fn run(handle: &Arc<IdleShared>) {
    let cb = handle.cb.lock().unwrap().take();
    let Some(mut cb) = cb else { return };

    cb();

    // Put the callback back unless the idle stopped itself.
    if handle.key.lock().unwrap().is_some() {
        let mut slot = handle.cb.lock().unwrap();
        if slot.is_none() {
            *slot = Some(cb);
        }
    }
}

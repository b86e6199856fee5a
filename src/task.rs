//! Offloading synchronous work to worker threads.
//!
//! A [`Task`] wraps a callable and an event loop. Invoking it spawns
//! a worker thread, runs the body there, and delivers the result as
//! a [`Future`] settled on the loop thread. The worker is always
//! joined before its promise settles, inside the closure posted back
//! to the loop, so no thread outlives its join point.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;

use crate::error::Error;
use crate::event::event_loop::Loop;
use crate::event::promise::{Future, Promise};

/// Run `body` on a fresh worker thread, settling the returned future
/// on the loop thread.
///
/// The body is not cancellable: dropping the returned future does
/// not stop the worker, which still runs to completion and posts its
/// result. A panicking body is caught and surfaces as a worker-kind
/// rejection.
pub fn offload<F, R>(lp: &Loop, body: F) -> Future<R>
where
    F: FnOnce() -> Result<R, Error> + Send + 'static,
    R: Send + 'static,
{
    let promise = Promise::new();
    let future = promise.future();
    let lp = lp.clone();
    let (handle_tx, handle_rx) = mpsc::channel::<thread::JoinHandle<()>>();

    let handle = thread::spawn(move || {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(result) => result,
            Err(payload) => Err(Error::worker(panic_message(&payload))),
        };

        lp.post(move || {
            // Join the worker before settling; the handle arrives on
            // the channel as soon as the spawning thread stored it.
            if let Ok(handle) = handle_rx.recv() {
                let _ = handle.join();
            }
            match outcome {
                Ok(value) => promise.resolve(value),
                Err(err) => promise.reject(err),
            }
        });
    });

    // The worker owns the receiving end, so this send only fails if
    // the settling post has already run, in which case the join
    // already happened.
    let _ = handle_tx.send(handle);

    future
}

/// A callable that runs its body on a worker thread and resolves a
/// future on the loop thread.
///
/// Created by [`make_task`]. Concurrent invocations are independent:
/// each spawns its own worker.
pub struct Task<A, R, F> {
    lp: Loop,
    body: Arc<F>,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R, F> Clone for Task<A, R, F> {
    fn clone(&self) -> Self {
        Task {
            lp: self.lp.clone(),
            body: self.body.clone(),
            _marker: PhantomData,
        }
    }
}

/// Create a [`Task`] from a callable.
pub fn make_task<A, R, F>(lp: &Loop, body: F) -> Task<A, R, F>
where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(A) -> Result<R, Error> + Send + Sync + 'static,
{
    Task {
        lp: lp.clone(),
        body: Arc::new(body),
        _marker: PhantomData,
    }
}

impl<A, R, F> Task<A, R, F>
where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(A) -> Result<R, Error> + Send + Sync + 'static,
{
    /// Invoke the task body on a worker thread with the given
    /// arguments.
    pub fn call(&self, args: A) -> Future<R> {
        let body = self.body.clone();
        offload(&self.lp, move || body(args))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task body panicked".to_string()
    }
}

//! Producer/consumer halves of a shared settlement state.
//!
//! A [`Promise`] is the producing half: it is settled exactly once
//! with `resolve` or `reject`. A [`Future`] is the consuming half: it
//! registers a continuation with [`Future::then`], which also builds
//! the next link of the chain.
//!
//! Settlement may happen from any thread; the continuation runs
//! synchronously on the settling thread. The stream and task
//! subsystems only settle through `Loop::post`, which is what pins
//! their continuations to the loop thread. Code settling a promise
//! directly from another thread must post the settlement itself.

use std::sync::{Arc, Mutex};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Resolved,
    Rejected,
    Finished,
}

struct State<T> {
    status: Status,
    value: Option<T>,
    error: Option<Error>,
    on_resolve: Option<Box<dyn FnOnce(T) + Send>>,
    on_reject: Option<Box<dyn FnOnce(Error) + Send>>,
    // Number of live Promise handles. The consumer side does not
    // count; a state whose producers all dropped while Pending is
    // rejected as broken.
    producers: usize,
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    fn new(status: Status, value: Option<T>, error: Option<Error>, producers: usize) -> Arc<Shared<T>> {
        Arc::new(Shared {
            state: Mutex::new(State {
                status,
                value,
                error,
                on_resolve: None,
                on_reject: None,
                producers,
            }),
        })
    }
}

impl<T: Send + 'static> Shared<T> {
    fn resolve(&self, value: T) {
        let mut state = self.state.lock().unwrap();
        if state.status != Status::Pending {
            drop(state);
            panic!("attempting to settle an already settled promise");
        }

        if let Some(cb) = state.on_resolve.take() {
            state.status = Status::Finished;
            let reject_arm = state.on_reject.take();
            drop(state);
            drop(reject_arm);
            cb(value);
        } else {
            state.value = Some(value);
            state.status = Status::Resolved;
        }
    }

    fn reject(&self, err: Error) {
        let mut state = self.state.lock().unwrap();
        if state.status != Status::Pending {
            drop(state);
            panic!("attempting to settle an already settled promise");
        }

        if let Some(cb) = state.on_reject.take() {
            state.status = Status::Finished;
            let resolve_arm = state.on_resolve.take();
            drop(state);
            drop(resolve_arm);
            cb(err);
        } else {
            // Latched; a later `then` forwards it down the chain.
            state.error = Some(err);
            state.status = Status::Rejected;
        }
    }

    fn register(
        &self,
        on_resolve: Box<dyn FnOnce(T) + Send>,
        on_reject: Box<dyn FnOnce(Error) + Send>,
    ) {
        let mut state = self.state.lock().unwrap();
        match state.status {
            Status::Pending => {
                if state.on_resolve.is_some() || state.on_reject.is_some() {
                    drop(state);
                    panic!("a continuation is already registered for this future");
                }
                state.on_resolve = Some(on_resolve);
                state.on_reject = Some(on_reject);
            }
            Status::Resolved => {
                let value = state.value.take().expect("resolved promise lost its value");
                state.status = Status::Finished;
                drop(state);
                drop(on_reject);
                on_resolve(value);
            }
            Status::Rejected => {
                let err = state.error.take().expect("rejected promise lost its error");
                state.status = Status::Finished;
                drop(state);
                drop(on_resolve);
                on_reject(err);
            }
            Status::Finished => {
                drop(state);
                panic!("this future's result has already been consumed");
            }
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap();
        if state.status == Status::Rejected {
            if let Some(err) = state.error.take() {
                log::warn!(
                    "promise rejection dropped without a handler; code={} message={:?}",
                    err.code(),
                    err.message()
                );
            }
        }
    }
}

/// The producing half of a shared settlement state.
///
/// Cloning shares the state; the last producer dropping while the
/// state is still pending rejects it with a broken-promise error.
pub struct Promise<T = ()> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Create a new, pending promise.
    pub fn new() -> Promise<T> {
        Promise {
            shared: Shared::new(Status::Pending, None, None, 1),
        }
    }

    /// Return the consuming half, sharing this promise's state.
    pub fn future(&self) -> Future<T> {
        Future {
            shared: self.shared.clone(),
        }
    }

    /// Settle the state with a value.
    ///
    /// If a continuation is registered it runs inline on this thread.
    ///
    /// # Panics
    ///
    /// Panics if the promise has already been settled.
    pub fn resolve(&self, value: T) {
        self.shared.resolve(value);
    }

    /// Settle the state with an error.
    ///
    /// If no reject continuation is registered the error is latched
    /// until one is.
    ///
    /// # Panics
    ///
    /// Panics if the promise has already been settled.
    pub fn reject(&self, err: Error) {
        self.shared.reject(err);
    }

    /// Returns true once a continuation has consumed the result.
    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().unwrap().status == Status::Finished
    }

    /// Return a settled state to pending so the promise can be
    /// settled again.
    ///
    /// Used by the reusable stream lifecycle promises (listen/close).
    /// Any unconsumed value, error, or continuation is discarded.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.status = Status::Pending;
        state.value = None;
        state.error = None;
        let arms = (state.on_resolve.take(), state.on_reject.take());
        drop(state);
        drop(arms);
    }
}

impl<T: Send + 'static> Default for Promise<T> {
    fn default() -> Promise<T> {
        Promise::new()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Promise<T> {
        self.shared.state.lock().unwrap().producers += 1;
        Promise {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        state.producers -= 1;
        if state.producers > 0 || state.status != Status::Pending {
            return;
        }

        // Last producer gone without settling.
        if let Some(cb) = state.on_reject.take() {
            state.status = Status::Finished;
            let resolve_arm = state.on_resolve.take();
            drop(state);
            drop(resolve_arm);
            cb(Error::broken_promise());
        } else {
            state.error = Some(Error::broken_promise());
            state.status = Status::Rejected;
        }
    }
}

/// The consuming half of a shared settlement state.
pub struct Future<T = ()> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Future<T> {
    /// A future that is already resolved with `value`.
    pub fn resolved(value: T) -> Future<T> {
        Future {
            shared: Shared::new(Status::Resolved, Some(value), None, 0),
        }
    }

    /// A future that is already rejected with `err`.
    pub fn rejected(err: Error) -> Future<T> {
        Future {
            shared: Shared::new(Status::Rejected, None, Some(err), 0),
        }
    }

    /// Register a continuation for the resolved path.
    ///
    /// The continuation's return value drives the returned future:
    /// a `Result` settles it directly, another `Future` is attached
    /// so its settlement flows through (no continuation ever observes
    /// a future of a future), and `()` resolves it with no value.
    /// Rejections bypass `on_resolve` and forward unchanged.
    ///
    /// If this future is already settled the continuation runs
    /// immediately on the calling thread; otherwise it runs when the
    /// producer settles, on the settling thread.
    pub fn then<F, R>(self, on_resolve: F) -> Future<R::Output>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoFuture,
    {
        let promise = Promise::new();
        let future = promise.future();
        let reject_arm = promise.clone();
        self.shared.register(
            Box::new(move |value| on_resolve(value).into_future().forward(promise)),
            Box::new(move |err| reject_arm.reject(err)),
        );
        future
    }

    /// Register continuations for both paths.
    ///
    /// This is the single point where a rejection may be recovered:
    /// `on_reject`'s return settles the output future exactly like
    /// `on_resolve`'s does, so both must converge on the same type.
    pub fn then_or_else<F, R, G, S>(self, on_resolve: F, on_reject: G) -> Future<R::Output>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoFuture,
        G: FnOnce(Error) -> S + Send + 'static,
        S: IntoFuture<Output = R::Output>,
    {
        let promise = Promise::new();
        let future = promise.future();
        let reject_arm = promise.clone();
        self.shared.register(
            Box::new(move |value| on_resolve(value).into_future().forward(promise)),
            Box::new(move |err| on_reject(err).into_future().forward(reject_arm)),
        );
        future
    }

    /// Drive `target` from this future's settlement.
    fn forward(self, target: Promise<T>) {
        let reject_arm = target.clone();
        self.shared.register(
            Box::new(move |value| target.resolve(value)),
            Box::new(move |err| reject_arm.reject(err)),
        );
    }
}

/// Conversion of a continuation's return value into the future that
/// drives the next link of a chain.
///
/// Implementations cover the three shapes a continuation can return:
/// another [`Future`] (attached, collapsing `Future<Future<T>>` to
/// `Future<T>`), a `Result` (an immediate value or failure), and `()`
/// for continuations with nothing to produce.
pub trait IntoFuture {
    /// The value type of the produced future.
    type Output: Send + 'static;

    /// Convert into a future.
    fn into_future(self) -> Future<Self::Output>;
}

impl<T: Send + 'static> IntoFuture for Future<T> {
    type Output = T;

    fn into_future(self) -> Future<T> {
        self
    }
}

impl<T: Send + 'static> IntoFuture for Result<T, Error> {
    type Output = T;

    fn into_future(self) -> Future<T> {
        match self {
            Ok(value) => Future::resolved(value),
            Err(err) => Future::rejected(err),
        }
    }
}

impl IntoFuture for () {
    type Output = ();

    fn into_future(self) -> Future<()> {
        Future::resolved(())
    }
}

//! The event loop and the promise machinery that runs on it.
//!
//! # Loop
//!
//! [`Loop`] owns the reactor and dispatches all work on the thread
//! that called [`Loop::run`]: I/O readiness, timer and idle
//! callbacks, promise continuations, and closures injected from
//! other threads with [`Loop::post`]. `run` returns once no live
//! work remains.
//!
//! # Promises and futures
//!
//! A [`Promise`] and its [`Future`] share one settlement state.
//! Continuations are registered with [`Future::then`]; a
//! continuation returning another future is attached in place, so a
//! chain never observes a future of a future. Rejections flow past
//! plain `then` continuations untouched and can only be recovered by
//! the two-path [`Future::then_or_else`].
//!
//! # Timers and idles
//!
//! [`Timeout`] and [`Idle`] are small utilities layered on the loop:
//! one-shot and repeating delays, and per-iteration callbacks that
//! keep the loop alive.

pub(crate) mod event_loop;
mod idle;
pub(crate) mod promise;
pub(crate) mod timeout;

pub use self::event_loop::{Config, Loop};
pub use self::idle::Idle;
pub use self::promise::{Future, IntoFuture, Promise};
pub use self::timeout::{wait, Timeout};

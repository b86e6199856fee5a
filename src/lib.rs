//! A small promise-driven asynchronous I/O runtime.
//!
//! This library provides an event loop that multiplexes timers,
//! idles, and byte streams, a promise/future pair for composing
//! asynchronous operations, and a task primitive that offloads
//! synchronous work to a worker thread and re-enters the loop with
//! the result.
//!
//! # The loop
//!
//! All user continuations run on the single thread that called
//! [`event::Loop::run`]. Parallelism exists only behind the scenes:
//! the reactor delivering completions and task worker threads, both
//! of which re-enter the loop through [`event::Loop::post`].
//!
//! ```
//! use promio::event::Loop;
//!
//! let lp = Loop::new().unwrap();
//! lp.post(|| println!("hello from the loop thread"));
//! lp.run().unwrap();
//! ```
//!
//! # Promises
//!
//! A [`event::Promise`] is settled exactly once; its
//! [`event::Future`] chains continuations with `then`. Continuations
//! returning futures are attached in place, so a chain never sees a
//! future of a future, and rejections flow past plain `then` links
//! until a two-path `then_or_else` recovers them.
//!
//! ```
//! use promio::event::Promise;
//!
//! let promise = Promise::<i32>::new();
//! promise
//!     .future()
//!     .then(|v| Ok(v * 2))
//!     .then(|v| assert_eq!(8, v));
//! promise.resolve(4);
//! ```
//!
//! # Tasks
//!
//! [`task::make_task`] wraps a callable; invoking it runs the body
//! on a worker thread and resolves a future on the loop thread. The
//! worker is always joined before the future settles.
//!
//! # Streams
//!
//! [`io::Pipe`], [`io::Tcp`], and [`io::Udp`] share one stream state
//! machine with continuous chunked reads, queued writes, and a
//! shutdown-first close. Servers accept polymorphically: the client
//! handed to a listen callback is typed by the handle type observed
//! at accept time.

#![warn(missing_docs)]

pub mod error;
pub mod event;
pub mod io;
pub mod task;

pub use error::{Error, ErrorKind};

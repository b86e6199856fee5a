//! The single threaded event dispatcher that owns the reactor.
//!
//! The loop multiplexes readiness events, timers, and idles on the
//! thread that called [`Loop::run`], and drains closures injected
//! from other threads with [`Loop::post`]. Everything the rest of
//! the crate does eventually funnels through here: stream readiness
//! is dispatched to per-source handlers, due timers fire, idles run
//! once per iteration, and posted closures execute exactly once in
//! FIFO order per origin thread.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mio::event::{Event, Source};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use slab::Slab;

use crate::event::idle::IdleShared;
use crate::event::timeout::TimerShared;
use crate::event::{idle, timeout};

/// Token reserved for the cross-thread wakeup.
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// Loop configuration options.
#[derive(Debug)]
pub struct Config {
    max_sources: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config { max_sources: 65_536 }
    }
}

impl Config {
    /// Create a `Config` with default values.
    pub fn new() -> Config {
        Config::default()
    }

    /// Set the max number of I/O sources the loop may concurrently
    /// track.
    pub fn max_sources(mut self, val: usize) -> Self {
        self.max_sources = val;
        self
    }
}

/// Readiness reported for a registered source.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ready {
    pub readable: bool,
    pub writable: bool,
    pub closed: bool,
}

impl Ready {
    fn from_event(event: &Event) -> Ready {
        Ready {
            readable: event.is_readable(),
            writable: event.is_writable(),
            closed: event.is_read_closed() || event.is_write_closed(),
        }
    }
}

pub(crate) type SourceCallback = Box<dyn FnMut(Ready) + Send>;

pub(crate) struct SourceHandler {
    cb: Mutex<SourceCallback>,
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    gen: u64,
    timer: Arc<TimerShared>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &TimerEntry) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &TimerEntry) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &TimerEntry) -> std::cmp::Ordering {
        // Reversed so the binary heap pops the earliest deadline.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    registry: Registry,
    poll: Mutex<Poll>,
    waker: Waker,
    sources: Mutex<Slab<Arc<SourceHandler>>>,
    timers: Mutex<std::collections::BinaryHeap<TimerEntry>>,
    idles: Mutex<Slab<Arc<IdleShared>>>,
    posts: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
    // Count of operations that keep `run` from returning: queued
    // posts, armed timers, started idles, and in-flight stream work.
    active: AtomicUsize,
    running: AtomicBool,
    timer_seq: AtomicU64,
    max_sources: usize,
}

/// The event loop which runs all work.
///
/// The loop is cheap to clone; clones share the same state and any
/// clone may be moved to another thread to call [`Loop::post`].
/// [`Loop::run`] itself pins the loop to the calling thread.
#[derive(Clone)]
pub struct Loop {
    inner: Arc<Inner>,
}

impl Loop {
    /// Create a loop with default configuration values.
    pub fn new() -> io::Result<Loop> {
        Loop::with_config(Config::default())
    }

    /// Create a loop with the given configuration values.
    pub fn with_config(config: Config) -> io::Result<Loop> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;

        Ok(Loop {
            inner: Arc::new(Inner {
                registry,
                poll: Mutex::new(poll),
                waker,
                sources: Mutex::new(Slab::new()),
                timers: Mutex::new(std::collections::BinaryHeap::new()),
                idles: Mutex::new(Slab::new()),
                posts: Mutex::new(VecDeque::new()),
                active: AtomicUsize::new(0),
                running: AtomicBool::new(false),
                timer_seq: AtomicU64::new(0),
                max_sources: config.max_sources,
            }),
        })
    }

    /// Run all work on the loop, blocking the calling thread.
    ///
    /// As long as there is live work (armed timers, started idles,
    /// active stream operations, or queued posts) this method does
    /// not return. The loop is non-reentrant.
    ///
    /// A panic raised by a posted closure is re-raised here once the
    /// post's resources have been released.
    pub fn run(&self) -> io::Result<()> {
        struct RunGuard<'a>(&'a AtomicBool);

        impl Drop for RunGuard<'_> {
            fn drop(&mut self) {
                self.0.store(false, Ordering::SeqCst);
            }
        }

        if self.inner.running.swap(true, Ordering::SeqCst) {
            panic!("Loop::run called while the loop is already running");
        }
        let _guard = RunGuard(&self.inner.running);

        log::debug!("starting event loop");
        let mut events = Events::with_capacity(256);

        loop {
            if self.inner.active.load(Ordering::SeqCst) == 0 {
                break;
            }

            let timeout = self.poll_timeout();
            {
                let mut poll = self.inner.poll.lock().unwrap();
                match poll.poll(&mut events, timeout) {
                    Ok(()) => {}
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }

            log::trace!(
                "loop iteration; events={} active={}",
                events.iter().count(),
                self.inner.active.load(Ordering::SeqCst)
            );

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    self.drain_posts();
                } else {
                    self.dispatch(event);
                }
            }

            self.fire_timers();
            self.run_idles();
        }

        log::debug!("event loop finished; no live work remains");
        Ok(())
    }

    /// Execute a closure on the loop's thread.
    ///
    /// This function can be called from any thread. Closures posted
    /// from one thread run in the order they were posted; each runs
    /// exactly once. A panicking closure has its resources released
    /// and the panic is re-raised out of [`Loop::run`].
    pub fn post<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        self.inner.posts.lock().unwrap().push_back(Box::new(f));
        if let Err(e) = self.inner.waker.wake() {
            log::warn!("failed to wake the loop; error={:?}", e);
        }
    }

    fn poll_timeout(&self) -> Option<Duration> {
        if !self.inner.idles.lock().unwrap().is_empty() {
            return Some(Duration::ZERO);
        }
        let timers = self.inner.timers.lock().unwrap();
        timers
            .peek()
            .map(|entry| entry.deadline.saturating_duration_since(Instant::now()))
    }

    fn drain_posts(&self) {
        loop {
            let job = self.inner.posts.lock().unwrap().pop_front();
            let Some(job) = job else { return };

            self.inner.active.fetch_sub(1, Ordering::SeqCst);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || job())) {
                // The boxed closure was consumed above; nothing of
                // the post remains before the panic continues.
                panic::resume_unwind(payload);
            }
        }
    }

    fn dispatch(&self, event: &Event) {
        let handler = {
            let sources = self.inner.sources.lock().unwrap();
            sources.get(event.token().0).cloned()
        };

        if let Some(handler) = handler {
            log::trace!(
                "source event; token={:?} readable={} writable={}",
                event.token(),
                event.is_readable(),
                event.is_writable()
            );
            (handler.cb.lock().unwrap())(Ready::from_event(event));
        }
    }

    fn fire_timers(&self) {
        let now = Instant::now();
        let mut due = Vec::new();
        {
            let mut timers = self.inner.timers.lock().unwrap();
            while let Some(entry) = timers.peek() {
                if entry.deadline > now {
                    break;
                }
                due.push(timers.pop().unwrap());
            }
        }

        for entry in due {
            timeout::fire(&entry.timer, entry.gen, entry.deadline, self);
        }
    }

    fn run_idles(&self) {
        let snapshot: Vec<Arc<IdleShared>> = {
            let idles = self.inner.idles.lock().unwrap();
            idles.iter().map(|(_, handle)| handle.clone()).collect()
        };

        for handle in snapshot {
            idle::run(&handle);
        }
    }

    // ===== Internal registration API =====

    pub(crate) fn add_source(
        &self,
        source: &mut dyn Source,
        interest: Interest,
        cb: SourceCallback,
    ) -> io::Result<Token> {
        let token = {
            let mut sources = self.inner.sources.lock().unwrap();
            if sources.len() >= self.inner.max_sources {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "source limit reached",
                ));
            }
            Token(sources.insert(Arc::new(SourceHandler { cb: Mutex::new(cb) })))
        };

        match self.inner.registry.register(source, token, interest) {
            Ok(()) => Ok(token),
            Err(e) => {
                self.inner.sources.lock().unwrap().remove(token.0);
                Err(e)
            }
        }
    }

    pub(crate) fn reregister_source(
        &self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.inner.registry.reregister(source, token, interest)
    }

    pub(crate) fn remove_source(&self, source: &mut dyn Source, token: Token) {
        if let Err(e) = self.inner.registry.deregister(source) {
            log::trace!("deregister failed; token={:?} error={:?}", token, e);
        }
        let mut sources = self.inner.sources.lock().unwrap();
        if sources.contains(token.0) {
            sources.remove(token.0);
        }
    }

    pub(crate) fn add_timer(&self, deadline: Instant, timer: Arc<TimerShared>, gen: u64) {
        let seq = self.inner.timer_seq.fetch_add(1, Ordering::SeqCst);
        self.inner.timers.lock().unwrap().push(TimerEntry {
            deadline,
            seq,
            gen,
            timer,
        });
    }

    pub(crate) fn add_idle(&self, handle: Arc<IdleShared>) -> usize {
        self.inner.idles.lock().unwrap().insert(handle)
    }

    pub(crate) fn remove_idle(&self, key: usize) {
        let mut idles = self.inner.idles.lock().unwrap();
        if idles.contains(key) {
            idles.remove(key);
        }
    }

    /// Record that an asynchronous operation keeps the loop alive.
    pub(crate) fn activity_started(&self) {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that an asynchronous operation completed.
    pub(crate) fn activity_finished(&self) {
        let previous = self.inner.active.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "activity count underflow");
    }
}

//! The shared stream state machine behind pipe, TCP, and UDP.
//!
//! A [`BasicStream`] owns one backing transport and carries the full
//! read/write/close lifecycle: continuous reads delivering chunks to
//! a callback, queued writes completed on writability, listening
//! with polymorphic accept, and a shutdown-first close. Concrete
//! transports ([`crate::io::Pipe`], [`crate::io::Tcp`],
//! [`crate::io::Udp`]) are thin constructors over this type; the
//! client handed to a listen callback is a `BasicStream` itself,
//! tagged with the transport observed at accept time.

use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::net::Shutdown;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use mio::net::{TcpStream, UdpSocket, UnixStream};
use mio::unix::SourceFd;
use mio::{Interest, Token};
use smallvec::SmallVec;
use socket2::{Domain, Socket, Type};

use crate::error::{Error, ErrorKind};
use crate::event::event_loop::{Loop, Ready, SourceCallback};
use crate::event::promise::{Future, Promise};

/// The transport backing a stream, observed as a tag at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleType {
    /// A local pipe (Unix domain socket or adopted descriptor).
    Pipe,
    /// A TCP socket.
    Tcp,
    /// A UDP socket.
    Udp,
}

pub(crate) enum Transport {
    /// Created but not yet opened, bound, or connected.
    Empty,
    Pipe(UnixStream),
    /// An adopted raw descriptor, e.g. an anonymous pipe end.
    Fd(std::fs::File),
    Tcp(TcpStream),
    Udp(UdpSocket),
    /// A bound (and possibly listening) socket of any domain.
    Listener(Socket),
    Closed,
}

impl Transport {
    fn is_open_for_io(&self) -> bool {
        matches!(
            self,
            Transport::Pipe(_) | Transport::Fd(_) | Transport::Tcp(_) | Transport::Udp(_)
        )
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Pipe(s) => s.read(buf),
            Transport::Fd(f) => f.read(buf),
            Transport::Tcp(s) => s.read(buf),
            Transport::Udp(s) => s.recv_from(buf).map(|(n, _)| n),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Pipe(s) => s.write(buf),
            Transport::Fd(f) => f.write(buf),
            Transport::Tcp(s) => s.write(buf),
            Transport::Udp(s) => s.send(buf),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn shutdown_write(&self) {
        let _ = match self {
            Transport::Pipe(s) => s.shutdown(Shutdown::Write),
            Transport::Tcp(s) => s.shutdown(Shutdown::Write),
            _ => Ok(()),
        };
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        match self {
            Transport::Pipe(s) => s.take_error(),
            Transport::Tcp(s) => s.take_error(),
            _ => Ok(None),
        }
    }

    fn register(&mut self, lp: &Loop, interest: Interest, cb: SourceCallback) -> io::Result<Token> {
        match self {
            Transport::Pipe(s) => lp.add_source(s, interest, cb),
            Transport::Tcp(s) => lp.add_source(s, interest, cb),
            Transport::Udp(s) => lp.add_source(s, interest, cb),
            Transport::Fd(f) => {
                let raw = std::os::fd::AsRawFd::as_raw_fd(f);
                lp.add_source(&mut SourceFd(&raw), interest, cb)
            }
            Transport::Listener(s) => {
                let raw = std::os::fd::AsRawFd::as_raw_fd(s);
                lp.add_source(&mut SourceFd(&raw), interest, cb)
            }
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn reregister(&mut self, lp: &Loop, token: Token, interest: Interest) -> io::Result<()> {
        match self {
            Transport::Pipe(s) => lp.reregister_source(s, token, interest),
            Transport::Tcp(s) => lp.reregister_source(s, token, interest),
            Transport::Udp(s) => lp.reregister_source(s, token, interest),
            Transport::Fd(f) => {
                let raw = std::os::fd::AsRawFd::as_raw_fd(f);
                lp.reregister_source(&mut SourceFd(&raw), token, interest)
            }
            Transport::Listener(s) => {
                let raw = std::os::fd::AsRawFd::as_raw_fd(s);
                lp.reregister_source(&mut SourceFd(&raw), token, interest)
            }
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn deregister(&mut self, lp: &Loop, token: Token) {
        match self {
            Transport::Pipe(s) => lp.remove_source(s, token),
            Transport::Tcp(s) => lp.remove_source(s, token),
            Transport::Udp(s) => lp.remove_source(s, token),
            Transport::Fd(f) => {
                let raw = std::os::fd::AsRawFd::as_raw_fd(f);
                lp.remove_source(&mut SourceFd(&raw), token)
            }
            Transport::Listener(s) => {
                let raw = std::os::fd::AsRawFd::as_raw_fd(s);
                lp.remove_source(&mut SourceFd(&raw), token)
            }
            _ => {}
        }
    }
}

struct ReadState {
    on_chunk: Option<Box<dyn FnMut(Bytes) + Send>>,
    promise: Option<Promise<usize>>,
    total: usize,
}

struct WriteRequest {
    buf: Bytes,
    pos: usize,
    promise: Option<Promise<usize>>,
}

struct ListenState {
    on_client: Option<Box<dyn FnMut(BasicStream) + Send>>,
}

struct StreamInner {
    lp: Loop,
    kind: HandleType,
    ipc: bool,
    io: Transport,
    token: Option<Token>,
    registered: Option<Interest>,
    read: Option<ReadState>,
    writes: SmallVec<[WriteRequest; 4]>,
    listen: Option<ListenState>,
    listen_promise: Promise<()>,
    close_promise: Promise<()>,
    connect: Option<Promise<()>>,
    connected: bool,
    closing: bool,
}

impl StreamInner {
    fn desired_interest(&self) -> Option<Interest> {
        let mut interest: Option<Interest> = None;
        if self.read.is_some() || self.listen.is_some() {
            interest = Some(Interest::READABLE);
        }
        if !self.writes.is_empty() || self.connect.is_some() {
            interest = Some(match interest {
                Some(i) => i | Interest::WRITABLE,
                None => Interest::WRITABLE,
            });
        }
        interest
    }
}

/// A reactor-backed bidirectional byte channel.
///
/// Handles are cheap to clone and share one underlying stream.
#[derive(Clone)]
pub struct BasicStream {
    state: Arc<Mutex<StreamInner>>,
}

impl fmt::Debug for BasicStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicStream").finish_non_exhaustive()
    }
}

enum Accepted {
    Client(Socket),
    Done,
    Retry,
    Failed(io::Error),
}

impl BasicStream {
    pub(crate) fn new(lp: &Loop, kind: HandleType, ipc: bool) -> BasicStream {
        BasicStream {
            state: Arc::new(Mutex::new(StreamInner {
                lp: lp.clone(),
                kind,
                ipc,
                io: Transport::Empty,
                token: None,
                registered: None,
                read: None,
                writes: SmallVec::new(),
                listen: None,
                listen_promise: Promise::new(),
                close_promise: Promise::new(),
                connect: None,
                connected: false,
                closing: false,
            })),
        }
    }

    /// A stream over an already connected or adopted transport.
    pub(crate) fn from_parts(lp: &Loop, kind: HandleType, io: Transport) -> BasicStream {
        let stream = BasicStream::new(lp, kind, false);
        {
            let mut inner = stream.state.lock().unwrap();
            inner.io = io;
            inner.connected = true;
        }
        stream
    }

    /// The transport tag of this stream.
    pub fn handle_type(&self) -> HandleType {
        self.state.lock().unwrap().kind
    }

    /// The local socket address of the backing transport, if any.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, Error> {
        let inner = self.state.lock().unwrap();
        let addr = match &inner.io {
            Transport::Tcp(s) => s.local_addr(),
            Transport::Udp(s) => s.local_addr(),
            Transport::Listener(s) => s
                .local_addr()
                .map(|addr| addr.as_socket().unwrap_or(([0, 0, 0, 0], 0).into())),
            _ => Err(io::ErrorKind::NotConnected.into()),
        };
        addr.map_err(|e| Error::from_io(ErrorKind::Stream, &e))
    }

    /// Begin continuous reads.
    ///
    /// Each chunk is handed to `on_chunk` on the loop thread. The
    /// returned future resolves with the cumulative byte count when
    /// the peer closes cleanly or [`BasicStream::stop_read`] runs,
    /// and rejects on a transport error. Exactly one read may be
    /// active per stream.
    pub fn read<F>(&self, on_chunk: F) -> Future<usize>
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        let mut inner = self.state.lock().unwrap();
        if inner.read.is_some() {
            return Future::rejected(Error::stream(
                i64::from(libc::EALREADY),
                "Read already in progress.",
            ));
        }
        if !inner.io.is_open_for_io() {
            return Future::rejected(Error::stream(
                i64::from(libc::ENOTCONN),
                "Stream is not open.",
            ));
        }

        let promise = Promise::new();
        let future = promise.future();
        inner.read = Some(ReadState {
            on_chunk: Some(Box::new(on_chunk)),
            promise: Some(promise),
            total: 0,
        });

        let lp = inner.lp.clone();
        if let Err(e) = Self::update_registration(&self.state, &mut inner) {
            let read = inner.read.take().unwrap();
            drop(inner);
            if let Some(promise) = read.promise {
                promise.reject(Error::from_io(ErrorKind::Stream, &e));
            }
            return future;
        }
        drop(inner);
        lp.activity_started();
        future
    }

    /// Stop chunk delivery, resolving the read future with the
    /// cumulative byte count. Safe to call from the chunk callback.
    pub fn stop_read(&self) {
        let mut inner = self.state.lock().unwrap();
        let Some(read) = inner.read.take() else { return };
        let lp = inner.lp.clone();
        let _ = Self::update_registration(&self.state, &mut inner);
        drop(inner);
        lp.activity_finished();
        log::trace!("read stopped; total={}", read.total);
        if let Some(promise) = read.promise {
            promise.resolve(read.total);
        }
    }

    /// Enqueue a write.
    ///
    /// The returned future resolves with the number of bytes written
    /// once the transport has accepted the whole buffer.
    pub fn write<B: Into<Bytes>>(&self, buf: B) -> Future<usize> {
        let buf = buf.into();
        let mut inner = self.state.lock().unwrap();
        if inner.closing || !inner.io.is_open_for_io() {
            return Future::rejected(Error::stream(
                i64::from(libc::ENOTCONN),
                "Stream is not open.",
            ));
        }

        let promise = Promise::new();
        let future = promise.future();
        inner.writes.push(WriteRequest {
            buf,
            pos: 0,
            promise: Some(promise),
        });
        let lp = inner.lp.clone();
        drop(inner);
        lp.activity_started();

        // Try to complete the write inline; the reactor takes over if
        // the transport pushes back.
        Self::flush_writes(&self.state);
        future
    }

    /// Close the stream.
    ///
    /// The write side is shut down first, reads stop (resolving a
    /// pending read future with its byte count), the listen promise
    /// resolves, and the returned future resolves once the handle is
    /// released.
    pub fn close(&self) -> Future<()> {
        Self::close_impl(&self.state, None)
    }

    /// Close the stream, rejecting the listen promise with `err`
    /// before releasing the handle.
    pub fn close_with_error(&self, err: Error) -> Future<()> {
        Self::close_impl(&self.state, Some(err))
    }

    // ===== Wrapper-facing internals =====

    pub(crate) fn is_ipc(&self) -> bool {
        self.state.lock().unwrap().ipc
    }

    pub(crate) fn set_io(&self, io: Transport) {
        let mut inner = self.state.lock().unwrap();
        inner.io = io;
    }

    pub(crate) fn adopt(&self, io: Transport) {
        let mut inner = self.state.lock().unwrap();
        inner.io = io;
        inner.connected = true;
    }

    /// Enforce the connect-at-most-once invariant.
    pub(crate) fn check_connect_once(&self) -> Result<(), Error> {
        let inner = self.state.lock().unwrap();
        if inner.connected || inner.connect.is_some() {
            return Err(Error::misuse(1, "Cannot connect a pipe twice."));
        }
        Ok(())
    }

    /// Install a connecting transport and wait for the reactor to
    /// report the outcome.
    pub(crate) fn begin_connect(&self, io: Transport) -> Future<()> {
        let mut inner = self.state.lock().unwrap();
        let promise = Promise::new();
        let future = promise.future();
        inner.io = io;
        inner.connected = true;
        inner.connect = Some(promise);

        let lp = inner.lp.clone();
        if let Err(e) = Self::update_registration(&self.state, &mut inner) {
            let promise = inner.connect.take().unwrap();
            drop(inner);
            promise.reject(Error::from_io(ErrorKind::Transport, &e));
            return future;
        }
        drop(inner);
        lp.activity_started();
        future
    }

    /// Start accepting on a bound listener.
    pub(crate) fn begin_listen(
        &self,
        backlog: i32,
        on_client: Box<dyn FnMut(BasicStream) + Send>,
    ) -> Future<()> {
        let mut inner = self.state.lock().unwrap();
        match &inner.io {
            Transport::Listener(sock) => {
                if let Err(e) = sock.listen(backlog) {
                    return Future::rejected(Error::from_io(ErrorKind::Transport, &e));
                }
            }
            _ => {
                return Future::rejected(Error::stream(
                    i64::from(libc::EINVAL),
                    "Stream is not bound.",
                ));
            }
        }

        inner.listen = Some(ListenState {
            on_client: Some(on_client),
        });
        let future = inner.listen_promise.future();
        let lp = inner.lp.clone();
        if let Err(e) = Self::update_registration(&self.state, &mut inner) {
            inner.listen = None;
            drop(inner);
            return Future::rejected(Error::from_io(ErrorKind::Transport, &e));
        }
        drop(inner);
        lp.activity_started();
        log::debug!("listening; backlog={}", backlog);
        future
    }

    /// Resolve this UDP stream's default peer.
    pub(crate) fn udp_connect(&self, addr: std::net::SocketAddr) -> Future<()> {
        let mut guard = self.state.lock().unwrap();
        let inner = &mut *guard;
        match &inner.io {
            Transport::Udp(sock) => match sock.connect(addr) {
                Ok(()) => {
                    inner.connected = true;
                    Future::resolved(())
                }
                Err(e) => Future::rejected(Error::from_io(ErrorKind::Transport, &e)),
            },
            _ => Future::rejected(Error::stream(
                i64::from(libc::ENOTCONN),
                "Stream is not open.",
            )),
        }
    }

    // ===== Readiness handling =====

    fn on_ready(state: &Arc<Mutex<StreamInner>>, ready: Ready) {
        if ready.writable {
            Self::finish_connect(state);
            Self::flush_writes(state);
        }
        if ready.readable || ready.closed {
            let listening = state.lock().unwrap().listen.is_some();
            if listening {
                Self::accept_ready(state);
            } else {
                Self::drain_reads(state);
            }
        }
    }

    fn finish_connect(state: &Arc<Mutex<StreamInner>>) {
        let settled = {
            let mut inner = state.lock().unwrap();
            match inner.connect.take() {
                None => None,
                Some(promise) => {
                    let err = match inner.io.take_error() {
                        Ok(Some(e)) => Some(e),
                        Ok(None) => None,
                        Err(e) => Some(e),
                    };
                    let lp = inner.lp.clone();
                    let _ = Self::update_registration(state, &mut inner);
                    Some((promise, err, lp))
                }
            }
        };

        if let Some((promise, err, lp)) = settled {
            lp.activity_finished();
            match err {
                None => {
                    log::trace!("connect completed");
                    promise.resolve(());
                }
                Some(e) => {
                    log::debug!("connect failed; error={:?}", e);
                    promise.reject(Error::from_io(ErrorKind::Transport, &e));
                }
            }
        }
    }

    fn drain_reads(state: &Arc<Mutex<StreamInner>>) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let mut inner = state.lock().unwrap();
            if inner.read.is_none() {
                return;
            }

            let result = inner.io.read(&mut buf);
            match result {
                Ok(0) if inner.kind != HandleType::Udp => {
                    // Clean EOF from the peer.
                    let read = inner.read.take().unwrap();
                    let lp = inner.lp.clone();
                    let _ = Self::update_registration(state, &mut inner);
                    drop(inner);
                    lp.activity_finished();
                    log::trace!("read reached eof; total={}", read.total);
                    if let Some(promise) = read.promise {
                        promise.resolve(read.total);
                    }
                    return;
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    let read = inner.read.as_mut().unwrap();
                    read.total += n;
                    let mut cb = read.on_chunk.take().expect("read callback missing");
                    drop(inner);

                    cb(chunk);

                    // Put the callback back unless the read stopped
                    // from inside it.
                    let mut inner = state.lock().unwrap();
                    if let Some(read) = inner.read.as_mut() {
                        if read.on_chunk.is_none() {
                            read.on_chunk = Some(cb);
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    drop(inner);
                    continue;
                }
                Err(e) => {
                    let read = inner.read.take().unwrap();
                    let lp = inner.lp.clone();
                    let _ = Self::update_registration(state, &mut inner);
                    drop(inner);
                    lp.activity_finished();
                    log::debug!("read failed; error={:?}", e);
                    if let Some(promise) = read.promise {
                        promise.reject(Error::from_io(ErrorKind::Transport, &e));
                    }
                    return;
                }
            }
        }
    }

    fn flush_writes(state: &Arc<Mutex<StreamInner>>) {
        loop {
            let mut guard = state.lock().unwrap();
            let inner = &mut *guard;
            if inner.writes.is_empty() {
                let _ = Self::update_registration(state, inner);
                return;
            }

            let req = &mut inner.writes[0];
            let result = inner.io.write(&req.buf[req.pos..]);
            match result {
                Ok(n) => {
                    req.pos += n;
                    if req.pos < req.buf.len() {
                        if n == 0 {
                            // No progress; wait for writability.
                            let _ = Self::update_registration(state, inner);
                            return;
                        }
                        continue;
                    }
                    let req = inner.writes.remove(0);
                    let lp = inner.lp.clone();
                    drop(guard);
                    lp.activity_finished();
                    log::trace!("write completed; bytes={}", req.buf.len());
                    if let Some(promise) = req.promise {
                        promise.resolve(req.buf.len());
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let _ = Self::update_registration(state, inner);
                    return;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let req = inner.writes.remove(0);
                    let lp = inner.lp.clone();
                    drop(guard);
                    lp.activity_finished();
                    log::debug!("write failed; error={:?}", e);
                    if let Some(promise) = req.promise {
                        promise.reject(Error::from_io(ErrorKind::Transport, &e));
                    }
                }
            }
        }
    }

    fn accept_ready(state: &Arc<Mutex<StreamInner>>) {
        loop {
            let step = {
                let inner = state.lock().unwrap();
                if inner.closing {
                    // close() ran inside on_client; stop accepting
                    // before the finalizer releases the handle.
                    return;
                }
                match &inner.io {
                    Transport::Listener(sock) => match sock.accept() {
                        Ok((client, _addr)) => Accepted::Client(client),
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Accepted::Done,
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Accepted::Retry,
                        Err(e) => Accepted::Failed(e),
                    },
                    _ => Accepted::Done,
                }
            };

            match step {
                Accepted::Done => return,
                Accepted::Retry => continue,
                Accepted::Failed(e) => {
                    log::debug!("accept failed; error={:?}", e);
                    let err = Error::from_io(ErrorKind::Transport, &e);
                    drop(Self::close_impl(state, Some(err)));
                    return;
                }
                Accepted::Client(client) => {
                    let lp = state.lock().unwrap().lp.clone();
                    let client = match Self::make_client(&lp, client) {
                        Ok(client) => client,
                        Err(err) => {
                            drop(Self::close_impl(state, Some(err)));
                            return;
                        }
                    };
                    log::trace!("accepted client; type={:?}", client.handle_type());

                    let cb = {
                        let mut inner = state.lock().unwrap();
                        inner.listen.as_mut().and_then(|l| l.on_client.take())
                    };
                    let Some(mut cb) = cb else { return };

                    cb(client);

                    let mut inner = state.lock().unwrap();
                    if let Some(listen) = inner.listen.as_mut() {
                        if listen.on_client.is_none() {
                            listen.on_client = Some(cb);
                        }
                    }
                }
            }
        }
    }

    /// Build the client stream matching the accepted handle's
    /// observed domain and type.
    fn make_client(lp: &Loop, sock: Socket) -> Result<BasicStream, Error> {
        fn as_transport(e: io::Error) -> Error {
            Error::from_io(ErrorKind::Transport, &e)
        }

        sock.set_nonblocking(true).map_err(as_transport)?;
        let domain = sock.domain().map_err(as_transport)?;
        let ty = sock.r#type().map_err(as_transport)?;

        let (kind, io) = if domain == Domain::UNIX && ty == Type::STREAM {
            let stream: std::os::unix::net::UnixStream = sock.into();
            (HandleType::Pipe, Transport::Pipe(UnixStream::from_std(stream)))
        } else if (domain == Domain::IPV4 || domain == Domain::IPV6) && ty == Type::STREAM {
            let stream: std::net::TcpStream = sock.into();
            (HandleType::Tcp, Transport::Tcp(TcpStream::from_std(stream)))
        } else if (domain == Domain::IPV4 || domain == Domain::IPV6) && ty == Type::DGRAM {
            let socket: std::net::UdpSocket = sock.into();
            (HandleType::Udp, Transport::Udp(UdpSocket::from_std(socket)))
        } else {
            // The code carries the observed type tag so distinct
            // anomalies stay distinguishable.
            let tag: i32 = ty.into();
            return Err(Error::pipe(i64::from(tag), "Unknown client handle type."));
        };

        Ok(BasicStream::from_parts(lp, kind, io))
    }

    fn close_impl(state: &Arc<Mutex<StreamInner>>, err: Option<Error>) -> Future<()> {
        let mut inner = state.lock().unwrap();
        let future = inner.close_promise.future();
        if inner.closing {
            return future;
        }
        inner.closing = true;
        log::trace!("closing stream");

        // Best-effort flush of queued writes, then shut the write
        // side down so the peer observes EOF before the handle goes
        // away.
        let mut completed: Vec<(Option<Promise<usize>>, usize)> = Vec::new();
        {
            let stream = &mut *inner;
            while let Some(req) = stream.writes.first_mut() {
                let chunk = req.buf.slice(req.pos..);
                match stream.io.write(&chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        let req = stream.writes.first_mut().unwrap();
                        req.pos += n;
                        if req.pos == req.buf.len() {
                            let req = stream.writes.remove(0);
                            completed.push((req.promise, req.buf.len()));
                        }
                    }
                    Err(_) => break,
                }
            }
            stream.io.shutdown_write();
        }

        let read = inner.read.take();
        let listening = inner.listen.take();
        let connect = inner.connect.take();
        let remaining: SmallVec<[WriteRequest; 4]> = mem::take(&mut inner.writes);
        let listen_promise = inner.listen_promise.clone();
        let lp = inner.lp.clone();
        drop(inner);

        for (promise, len) in completed {
            lp.activity_finished();
            if let Some(promise) = promise {
                promise.resolve(len);
            }
        }
        for req in remaining {
            lp.activity_finished();
            if let Some(promise) = req.promise {
                promise.reject(Error::stream(
                    i64::from(libc::ECANCELED),
                    "Stream closed before write completed.",
                ));
            }
        }
        if let Some(read) = read {
            lp.activity_finished();
            if let Some(promise) = read.promise {
                promise.resolve(read.total);
            }
        }
        if let Some(promise) = connect {
            lp.activity_finished();
            promise.reject(Error::stream(
                i64::from(libc::ECANCELED),
                "Stream closed before connect completed.",
            ));
        }
        if listening.is_some() {
            lp.activity_finished();
        }

        match err {
            Some(err) => listen_promise.reject(err),
            None => listen_promise.resolve(()),
        }

        // The handle is released inside the posted finalizer; only
        // there does the close promise settle.
        let state = state.clone();
        lp.post(move || {
            let mut inner = state.lock().unwrap();
            let token = inner.token.take();
            let mut io = mem::replace(&mut inner.io, Transport::Closed);
            if let Some(token) = token {
                let lp = inner.lp.clone();
                io.deregister(&lp, token);
            }
            drop(io);
            inner.registered = None;
            inner.closing = false;
            inner.connected = false;
            let close_promise = inner.close_promise.clone();
            let listen_promise = inner.listen_promise.clone();
            drop(inner);

            log::trace!("stream closed");
            close_promise.resolve(());
            listen_promise.reset();
            close_promise.reset();
        });

        future
    }

    fn update_registration(
        state: &Arc<Mutex<StreamInner>>,
        inner: &mut StreamInner,
    ) -> io::Result<()> {
        let desired = inner.desired_interest();
        match (inner.token, desired) {
            (None, None) => Ok(()),
            (None, Some(interest)) => {
                let lp = inner.lp.clone();
                let handler_state = state.clone();
                let cb: SourceCallback =
                    Box::new(move |ready| BasicStream::on_ready(&handler_state, ready));
                let token = inner.io.register(&lp, interest, cb)?;
                inner.token = Some(token);
                inner.registered = Some(interest);
                Ok(())
            }
            (Some(token), Some(interest)) => {
                if inner.registered == Some(interest) {
                    return Ok(());
                }
                let lp = inner.lp.clone();
                inner.io.reregister(&lp, token, interest)?;
                inner.registered = Some(interest);
                Ok(())
            }
            (Some(token), None) => {
                let lp = inner.lp.clone();
                inner.io.deregister(&lp, token);
                inner.token = None;
                inner.registered = None;
                Ok(())
            }
        }
    }
}

//! A local process-to-process pipe.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;

use bytes::Bytes;
use mio::net::UnixStream;
use socket2::{SockAddr, SockRef, Socket, Type};

use crate::error::{Error, ErrorKind};
use crate::event::event_loop::Loop;
use crate::event::promise::Future;
use crate::io::stream::{BasicStream, HandleType, Transport};

/// Default listen backlog.
const DEFAULT_BACKLOG: i32 = 128;

/// A named or anonymous local pipe.
///
/// Ordinary pipes carry bytes; a pipe created with [`Pipe::new_ipc`]
/// may additionally carry handles, which is why its accept path
/// dispatches on the observed client handle type.
#[derive(Clone)]
pub struct Pipe {
    stream: BasicStream,
}

impl Pipe {
    /// Construct a standard pipe.
    pub fn new(lp: &Loop) -> Pipe {
        Pipe {
            stream: BasicStream::new(lp, HandleType::Pipe, false),
        }
    }

    /// Construct a pipe that can be used to pass handles.
    pub fn new_ipc(lp: &Loop) -> Pipe {
        Pipe {
            stream: BasicStream::new(lp, HandleType::Pipe, true),
        }
    }

    /// Whether this pipe was created in IPC mode.
    pub fn is_ipc(&self) -> bool {
        self.stream.is_ipc()
    }

    /// Open the pipe on an existing descriptor.
    ///
    /// Both socket descriptors (e.g. one end of a socketpair) and
    /// plain pipe descriptors are accepted; the descriptor is put
    /// into non-blocking mode and owned by the stream from here on.
    pub fn open<T: Into<OwnedFd>>(&self, fd: T) -> Result<(), Error> {
        let fd = fd.into();
        set_nonblocking(&fd).map_err(|e| Error::from_io(ErrorKind::Pipe, &e))?;
        log::trace!("opening pipe on fd {}", fd.as_raw_fd());

        // A stream socket reads with socket calls; anything else
        // goes through plain read/write on the descriptor.
        let is_stream_socket = SockRef::from(&fd)
            .r#type()
            .map(|ty| ty == Type::STREAM)
            .unwrap_or(false);
        let transport = if is_stream_socket {
            let stream = std::os::unix::net::UnixStream::from(fd);
            Transport::Pipe(UnixStream::from_std(stream))
        } else {
            Transport::Fd(std::fs::File::from(fd))
        };
        self.stream.adopt(transport);
        Ok(())
    }

    /// Create a named pipe endpoint at `name` and take ownership of
    /// it, e.g. `/tmp/my-awesome-pipe`.
    pub fn bind<P: AsRef<Path>>(&self, name: P) -> Result<(), Error> {
        let name = name.as_ref();
        log::trace!("binding to pipe named {:?}", name);
        let bound = (|| {
            let sock = Socket::new(socket2::Domain::UNIX, Type::STREAM, None)?;
            sock.set_nonblocking(true)?;
            sock.bind(&SockAddr::unix(name)?)?;
            Ok::<Socket, std::io::Error>(sock)
        })();

        match bound {
            Ok(sock) => {
                self.stream.set_io(Transport::Listener(sock));
                Ok(())
            }
            Err(e) => Err(Error::from_io(ErrorKind::Pipe, &e)),
        }
    }

    /// Connect to an existing named pipe endpoint.
    ///
    /// A pipe connects at most once; a second attempt rejects with
    /// code 1.
    pub fn connect<P: AsRef<Path>>(&self, name: P) -> Future<()> {
        if let Err(err) = self.stream.check_connect_once() {
            return Future::rejected(err);
        }
        let name = name.as_ref();
        log::trace!("connecting to pipe named {:?}", name);
        match UnixStream::connect(name) {
            Ok(sock) => self.stream.begin_connect(Transport::Pipe(sock)),
            Err(e) => Future::rejected(Error::from_io(ErrorKind::Pipe, &e)),
        }
    }

    /// Begin accepting connections with the default backlog.
    pub fn listen<F>(&self, on_client: F) -> Future<()>
    where
        F: FnMut(BasicStream) + Send + 'static,
    {
        self.listen_with_backlog(DEFAULT_BACKLOG, on_client)
    }

    /// Begin accepting connections.
    ///
    /// Each accepted client is wrapped in the stream type matching
    /// its observed handle type and handed to `on_client`. The
    /// returned future resolves when [`Pipe::close`] stops the
    /// server and rejects if accepting fails.
    pub fn listen_with_backlog<F>(&self, backlog: i32, on_client: F) -> Future<()>
    where
        F: FnMut(BasicStream) + Send + 'static,
    {
        self.stream.begin_listen(backlog, Box::new(on_client))
    }

    /// Begin continuous reads; see [`BasicStream::read`].
    pub fn read<F>(&self, on_chunk: F) -> Future<usize>
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        self.stream.read(on_chunk)
    }

    /// Stop chunk delivery; see [`BasicStream::stop_read`].
    pub fn stop_read(&self) {
        self.stream.stop_read()
    }

    /// Enqueue a write; see [`BasicStream::write`].
    pub fn write<B: Into<Bytes>>(&self, buf: B) -> Future<usize> {
        self.stream.write(buf)
    }

    /// Close the pipe; see [`BasicStream::close`].
    pub fn close(&self) -> Future<()> {
        self.stream.close()
    }

    /// Close the pipe, rejecting the listen promise with `err`.
    pub fn close_with_error(&self, err: Error) -> Future<()> {
        self.stream.close_with_error(err)
    }

    /// The underlying shared stream.
    pub fn as_stream(&self) -> &BasicStream {
        &self.stream
    }
}

fn set_nonblocking(fd: &OwnedFd) -> std::io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let res = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

//! TCP streams and servers over the shared stream machinery.

use std::net::SocketAddr;

use bytes::Bytes;
use mio::net::TcpStream;
use socket2::{Domain, SockAddr, Socket, Type};

use crate::error::{Error, ErrorKind};
use crate::event::event_loop::Loop;
use crate::event::promise::Future;
use crate::io::stream::{BasicStream, HandleType, Transport};

/// A TCP socket.
#[derive(Clone)]
pub struct Tcp {
    stream: BasicStream,
}

impl Tcp {
    /// Construct an unopened TCP stream.
    pub fn new(lp: &Loop) -> Tcp {
        Tcp {
            stream: BasicStream::new(lp, HandleType::Tcp, false),
        }
    }

    /// Bind a local address, preparing the socket for
    /// [`Tcp::listen`].
    pub fn bind(&self, addr: SocketAddr) -> Result<(), Error> {
        log::trace!("binding tcp socket to {}", addr);
        let bound = (|| {
            let domain = Domain::for_address(addr);
            let sock = Socket::new(domain, Type::STREAM, None)?;
            sock.set_reuse_address(true)?;
            sock.set_nonblocking(true)?;
            sock.bind(&SockAddr::from(addr))?;
            Ok::<Socket, std::io::Error>(sock)
        })();

        match bound {
            Ok(sock) => {
                self.stream.set_io(Transport::Listener(sock));
                Ok(())
            }
            Err(e) => Err(Error::from_io(ErrorKind::Stream, &e)),
        }
    }

    /// The local address of this socket.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.stream.local_addr()
    }

    /// Connect to a remote host.
    ///
    /// The returned future resolves once the reactor reports the
    /// connection established and rejects with the transport's error
    /// otherwise. A stream connects at most once.
    pub fn connect(&self, addr: SocketAddr) -> Future<()> {
        if let Err(err) = self.stream.check_connect_once() {
            return Future::rejected(err);
        }
        log::trace!("connecting tcp socket to {}", addr);
        match TcpStream::connect(addr) {
            Ok(sock) => self.stream.begin_connect(Transport::Tcp(sock)),
            Err(e) => Future::rejected(Error::from_io(ErrorKind::Transport, &e)),
        }
    }

    /// Begin accepting connections on a bound socket.
    pub fn listen<F>(&self, backlog: i32, on_client: F) -> Future<()>
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

    /// Close the stream; see [`BasicStream::close`].
    pub fn close(&self) -> Future<()> {
        self.stream.close()
    }

    /// Close the stream, rejecting the listen promise with `err`.
    pub fn close_with_error(&self, err: Error) -> Future<()> {
        self.stream.close_with_error(err)
    }

    /// The underlying shared stream.
    pub fn as_stream(&self) -> &BasicStream {
        &self.stream
    }
}

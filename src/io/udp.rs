//! UDP sockets over the shared stream machinery.
//!
//! Datagrams flow through the same read/write lifecycle as the byte
//! transports: each received datagram is one chunk, and a write
//! sends one datagram to the connected peer.

use std::net::SocketAddr;

use bytes::Bytes;
use mio::net::UdpSocket;

use crate::error::{Error, ErrorKind};
use crate::event::event_loop::Loop;
use crate::event::promise::Future;
use crate::io::stream::{BasicStream, HandleType, Transport};

/// A UDP socket.
#[derive(Clone)]
pub struct Udp {
    stream: BasicStream,
}

impl Udp {
    /// Construct an unopened UDP stream.
    pub fn new(lp: &Loop) -> Udp {
        Udp {
            stream: BasicStream::new(lp, HandleType::Udp, false),
        }
    }

    /// Bind a local address.
    pub fn bind(&self, addr: SocketAddr) -> Result<(), Error> {
        log::trace!("binding udp socket to {}", addr);
        match UdpSocket::bind(addr) {
            Ok(sock) => {
                self.stream.set_io(Transport::Udp(sock));
                Ok(())
            }
            Err(e) => Err(Error::from_io(ErrorKind::Stream, &e)),
        }
    }

    /// The local address of this socket.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.stream.local_addr()
    }

    /// Set the default peer for writes.
    ///
    /// UDP has no handshake, so the returned future settles
    /// immediately.
    pub fn connect(&self, addr: SocketAddr) -> Future<()> {
        if let Err(err) = self.stream.check_connect_once() {
            return Future::rejected(err);
        }
        self.stream.udp_connect(addr)
    }

    /// Begin receiving datagrams; each datagram is one chunk.
    pub fn read<F>(&self, on_chunk: F) -> Future<usize>
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        self.stream.read(on_chunk)
    }

    /// Stop datagram delivery; see [`BasicStream::stop_read`].
    pub fn stop_read(&self) {
        self.stream.stop_read()
    }

    /// Send one datagram to the connected peer.
    pub fn write<B: Into<Bytes>>(&self, buf: B) -> Future<usize> {
        self.stream.write(buf)
    }

    /// Close the socket; see [`BasicStream::close`].
    pub fn close(&self) -> Future<()> {
        self.stream.close()
    }

    /// The underlying shared stream.
    pub fn as_stream(&self) -> &BasicStream {
        &self.stream
    }
}

//! The error type shared by every part of the runtime.
//!
//! Errors carry a numeric code and a human readable message, plus a
//! component kind so callers can tell a transport failure apart from
//! API misuse without changing the code/message shape.

use std::{error, fmt, io};

/// Component that produced an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reactor-reported failure on read/write/accept/connect/shutdown.
    Transport,
    /// Stream-level failure or misuse.
    Stream,
    /// Pipe-level failure or misuse.
    Pipe,
    /// File operation failure.
    File,
    /// A pending timer was stopped before it fired.
    Cancelled,
    /// The producing half of a promise was dropped before settling.
    BrokenPromise,
    /// An operation was invoked in a state that can never succeed.
    Misuse,
    /// A task body failed on its worker thread.
    Worker,
}

/// An error with a numeric code and a message.
///
/// Codes for reactor-reported failures are the negated OS errno, and
/// their messages have the shape `"<ERRNO_NAME>: <os message>"`.
/// Domain-defined failures use small positive codes documented at
/// their origin.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    code: i64,
    message: String,
}

impl Error {
    /// Create an error from its raw parts.
    pub fn new<S: Into<String>>(kind: ErrorKind, code: i64, message: S) -> Error {
        Error {
            kind,
            code,
            message: message.into(),
        }
    }

    /// A stream-level error.
    pub fn stream<S: Into<String>>(code: i64, message: S) -> Error {
        Error::new(ErrorKind::Stream, code, message)
    }

    /// A pipe-level error.
    pub fn pipe<S: Into<String>>(code: i64, message: S) -> Error {
        Error::new(ErrorKind::Pipe, code, message)
    }

    /// A file operation error.
    pub fn file<S: Into<String>>(code: i64, message: S) -> Error {
        Error::new(ErrorKind::File, code, message)
    }

    /// An API misuse error.
    pub fn misuse<S: Into<String>>(code: i64, message: S) -> Error {
        Error::new(ErrorKind::Misuse, code, message)
    }

    /// The error delivered when a pending timer is stopped.
    pub fn cancelled() -> Error {
        Error::new(ErrorKind::Cancelled, 1, "Timeout cancelled.")
    }

    /// The error delivered when a promise is dropped unsettled.
    pub fn broken_promise() -> Error {
        Error::new(ErrorKind::BrokenPromise, 0, "Broken promise.")
    }

    /// A task body failure.
    pub fn worker<S: Into<String>>(message: S) -> Error {
        Error::new(ErrorKind::Worker, 0, message)
    }

    /// Translate an OS error reported by the reactor binding.
    pub(crate) fn from_io(kind: ErrorKind, err: &io::Error) -> Error {
        let raw = err.raw_os_error().unwrap_or(0);
        Error {
            kind,
            code: -i64::from(raw),
            message: format!("{}: {}", errno_name(raw), err),
        }
    }

    /// The component kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The numeric error code.
    pub fn code(&self) -> i64 {
        self.code
    }

    /// The human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.message, fmt)
    }
}

impl error::Error for Error {}

fn errno_name(raw: i32) -> &'static str {
    match raw {
        libc::EACCES => "EACCES",
        libc::EADDRINUSE => "EADDRINUSE",
        libc::EADDRNOTAVAIL => "EADDRNOTAVAIL",
        libc::EAGAIN => "EAGAIN",
        libc::EALREADY => "EALREADY",
        libc::EBADF => "EBADF",
        libc::ECANCELED => "ECANCELED",
        libc::ECONNABORTED => "ECONNABORTED",
        libc::ECONNREFUSED => "ECONNREFUSED",
        libc::ECONNRESET => "ECONNRESET",
        libc::EEXIST => "EEXIST",
        libc::EINVAL => "EINVAL",
        libc::EISCONN => "EISCONN",
        libc::EMFILE => "EMFILE",
        libc::ENFILE => "ENFILE",
        libc::ENOENT => "ENOENT",
        libc::ENOTCONN => "ENOTCONN",
        libc::ENOTDIR => "ENOTDIR",
        libc::EPERM => "EPERM",
        libc::EPIPE => "EPIPE",
        libc::ETIMEDOUT => "ETIMEDOUT",
        0 => "EOF",
        _ => "EUNKNOWN",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cancelled_shape() {
        let err = Error::cancelled();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.code(), 1);
        assert_eq!(err.message(), "Timeout cancelled.");
    }

    #[test]
    fn test_io_translation() {
        let io_err = io::Error::from_raw_os_error(libc::ECONNREFUSED);
        let err = Error::from_io(ErrorKind::Transport, &io_err);
        assert_eq!(err.code(), -i64::from(libc::ECONNREFUSED));
        assert!(err.message().starts_with("ECONNREFUSED: "));
    }
}

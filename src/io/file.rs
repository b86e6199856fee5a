//! Asynchronous file operations.
//!
//! The filesystem has no readiness to poll, so every operation runs
//! its blocking call on a worker thread and settles its future on
//! the loop thread, exactly like a task invocation.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::error::{Error, ErrorKind};
use crate::event::event_loop::Loop;
use crate::event::promise::Future;
use crate::task::offload;

/// A file whose operations are offloaded to worker threads.
#[derive(Clone)]
pub struct File {
    lp: Loop,
    handle: Arc<Mutex<Option<std::fs::File>>>,
}

impl File {
    /// Create an unopened file attached to the given loop.
    pub fn new(lp: &Loop) -> File {
        File {
            lp: lp.clone(),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Open `path` with the given options.
    pub fn open<P: Into<PathBuf>>(&self, path: P, opts: OpenOptions) -> Future<()> {
        let path = path.into();
        let handle = self.handle.clone();
        offload(&self.lp, move || {
            log::trace!("opening file {:?}", path);
            let file = opts
                .open(&path)
                .map_err(|e| Error::from_io(ErrorKind::File, &e))?;
            *handle.lock().unwrap() = Some(file);
            Ok(())
        })
    }

    /// Read the remainder of the file from the current position.
    pub fn read(&self) -> Future<Bytes> {
        let handle = self.handle.clone();
        offload(&self.lp, move || {
            let mut slot = handle.lock().unwrap();
            let file = slot.as_mut().ok_or_else(not_open)?;
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)
                .map_err(|e| Error::from_io(ErrorKind::File, &e))?;
            Ok(Bytes::from(contents))
        })
    }

    /// Write the whole buffer at the current position.
    pub fn write(&self, buf: Bytes) -> Future<usize> {
        let handle = self.handle.clone();
        offload(&self.lp, move || {
            let mut slot = handle.lock().unwrap();
            let file = slot.as_mut().ok_or_else(not_open)?;
            file.write_all(&buf)
                .map_err(|e| Error::from_io(ErrorKind::File, &e))?;
            Ok(buf.len())
        })
    }

    /// Close the file, releasing the descriptor.
    ///
    /// Closing an unopened file resolves trivially.
    pub fn close(&self) -> Future<()> {
        let handle = self.handle.clone();
        offload(&self.lp, move || {
            drop(handle.lock().unwrap().take());
            Ok(())
        })
    }
}

fn not_open() -> Error {
    Error::file(i64::from(libc::EBADF), "File is not open.")
}

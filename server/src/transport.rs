//! Forcing end-of-stream on a session's read side during graceful shutdown,
//! without disturbing its write side (mirrors the original's
//! `shutdown(fd, SHUT_RD)`).

use std::net::Shutdown;
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

pub trait ReadShutdown: Send + Sync {
    fn shutdown_read(&self);
}

#[cfg(unix)]
pub struct TcpReadShutdown(RawFd);

#[cfg(unix)]
impl TcpReadShutdown {
    pub fn new(stream: &tokio::net::TcpStream) -> Self {
        TcpReadShutdown(stream.as_raw_fd())
    }
}

#[cfg(unix)]
impl ReadShutdown for TcpReadShutdown {
    fn shutdown_read(&self) {
        // The fd outlives this call for as long as the session's TcpStream
        // is alive; wrap it without taking ownership so drop doesn't close it.
        let borrowed = unsafe { std::net::TcpStream::from_raw_fd(self.0) };
        let _ = borrowed.shutdown(Shutdown::Read);
        std::mem::forget(borrowed);
    }
}

/// Used by sessions backed by an in-memory duplex stream in tests, where
/// there is no socket to shut down; the test drives EOF by dropping its end.
pub struct NullReadShutdown;

impl ReadShutdown for NullReadShutdown {
    fn shutdown_read(&self) {}
}

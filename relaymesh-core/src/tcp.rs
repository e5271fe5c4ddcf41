//! TCP socket tuning for the internal channel.
//!
//! # Safety
//!
//! Setting socket options requires borrowing the raw fd; the unsafe code is
//! confined to this module and never closes the descriptor.

#![allow(unsafe_code)]

use std::io;

/// Enables `TCP_NODELAY` on a replication stream.
///
/// The channel carries one small frame per event with an ack turnaround per
/// frame; Nagle's algorithm would serialize the whole pipeline on delayed
/// acks.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_nodelay(stream: &compio::net::TcpStream) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let fd = stream.as_raw_fd();
        let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
        sock.set_nodelay(true)?;
        std::mem::forget(sock); // borrowed fd, must not be closed here
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = stream;
        Ok(())
    }
}

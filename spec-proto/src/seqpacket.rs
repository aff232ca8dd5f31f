//! Connected `SOCK_SEQPACKET` endpoints.
//!
//! Each `send` is delivered to the peer as exactly one `recv`, so frame
//! boundaries survive the trip without any length prefix. Both ends are
//! non-blocking and registered with the tokio reactor through [`AsyncFd`].
//!
//! # Usage
//!
//! ```ignore
//! let (a, b) = SeqPacket::pair()?;
//! a.send(&[0x00, 0x01]).await?;
//!
//! let mut buf = [0u8; 512];
//! match b.recv(&mut buf).await? {
//!     Packet::Data(n) => assert_eq!(&buf[..n], &[0x00, 0x01]),
//!     other => unreachable!("{:?}", other),
//! }
//! ```

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::io::unix::AsyncFd;

/// Outcome of a single receive.
///
/// Hangup takes precedence over Empty: a zero-length read is reported as
/// Hangup whenever the socket was already read-closed when the read
/// started, even if a zero-length datagram was still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    /// A datagram of `n` bytes was copied into the buffer.
    Data(usize),
    /// A datagram of `len` bytes didn't fit. The buffer holds its first
    /// `buf.len()` bytes and the rest was discarded.
    Truncated { len: usize },
    /// A zero-length datagram arrived while the peer is still connected.
    Empty,
    /// The peer closed its end.
    Hangup,
}

/// One end of a connected, message-preserving Unix socket pair.
pub struct SeqPacket {
    async_fd: AsyncFd<OwnedFd>,
}

impl std::fmt::Debug for SeqPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqPacket")
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}

impl SeqPacket {
    /// Create a connected pair.
    ///
    /// Must be called from within a tokio runtime with IO enabled.
    pub fn pair() -> io::Result<(Self, Self)> {
        let (fd0, fd1) = create_socketpair()?;
        let a = Self {
            async_fd: AsyncFd::new(fd0)?,
        };
        let b = Self {
            async_fd: AsyncFd::new(fd1)?,
        };
        tracing::trace!(a = a.as_raw_fd(), b = b.as_raw_fd(), "seqpacket pair created");
        Ok((a, b))
    }

    /// Send one datagram, waiting for buffer space if needed.
    ///
    /// Returns the number of bytes accepted by the kernel.
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.async_fd.writable().await?;
            match guard.try_io(|inner| send_raw(inner.as_raw_fd(), buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Send one datagram without waiting.
    ///
    /// Fails with [`io::ErrorKind::WouldBlock`] when the socket buffer is full.
    pub fn try_send(&self, buf: &[u8]) -> io::Result<usize> {
        send_raw(self.as_raw_fd(), buf)
    }

    /// Receive one datagram.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<Packet> {
        loop {
            let mut guard = self.async_fd.readable().await?;
            let read_closed = guard.ready().is_read_closed();

            match guard.try_io(|inner| recv_raw(inner.as_raw_fd(), buf)) {
                Ok(Ok(0)) if read_closed => return Ok(Packet::Hangup),
                Ok(Ok(0)) => return Ok(Packet::Empty),
                Ok(Ok(n)) if n > buf.len() => return Ok(Packet::Truncated { len: n }),
                Ok(Ok(n)) => return Ok(Packet::Data(n)),
                Ok(Err(e)) => return Err(e),
                // Readiness was stale; wait again.
                Err(_would_block) => continue,
            }
        }
    }

    /// Get the raw file descriptor.
    pub fn as_raw_fd(&self) -> RawFd {
        self.async_fd.get_ref().as_raw_fd()
    }
}

fn send_raw(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let flags = libc::MSG_NOSIGNAL;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let flags = 0;

    // SAFETY: fd is a valid socket, buf is a valid slice
    let ret = unsafe { libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), flags) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret as usize)
}

/// Returns the full datagram length, which may exceed `buf.len()`.
fn recv_raw(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: fd is a valid socket, buf is a valid mutable slice
    let ret = unsafe {
        libc::recv(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            libc::MSG_TRUNC,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret as usize)
}

/// Create a Unix domain socketpair (SOCK_SEQPACKET, non-blocking, close-on-exec).
fn create_socketpair() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let sock_type = libc::SOCK_SEQPACKET | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let sock_type = libc::SOCK_SEQPACKET;

    // SAFETY: fds points to two writable c_ints
    let ret = unsafe { libc::socketpair(libc::AF_UNIX, sock_type, 0, fds.as_mut_ptr()) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: socketpair succeeded, both fds are valid and owned by us
    let fd0 = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let fd1 = unsafe { OwnedFd::from_raw_fd(fds[1]) };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        configure_fd(fd0.as_raw_fd())?;
        configure_fd(fd1.as_raw_fd())?;
    }

    Ok((fd0, fd1))
}

/// Set non-blocking and close-on-exec where `socketpair` can't do it for us.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn configure_fd(fd: RawFd) -> io::Result<()> {
    // SAFETY: fd is valid for the duration of these calls
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

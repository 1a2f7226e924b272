use crate::error::{ConnectionError, Error, Result};
use crate::net::address::Address;
use crate::net::kind::{AddressFamily, ProtocolType, SockType};
use crate::net::socket::Socket;
use crate::sys::platform::{
    sys_accept, sys_bind, sys_connect, sys_get_socket_error, sys_listen, sys_peername, sys_recv,
    sys_send, sys_set_nodelay, sys_set_nonblocking, sys_set_reuseaddr, sys_shutdown, sys_sockname,
};
use crate::sys::{Interest, Waker, wait_or_wake, wait_ready};
use crate::time::Deadline;

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::RawFd;
use std::time::Duration;
use tracing::{debug, trace};

/// Outcome of [`TcpSocket::recv`].
///
/// End of stream and "nothing available yet" are distinct values so a
/// caller polling a non-blocking socket never mistakes one for the other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recv {
    /// Between one and `up_to` bytes.
    Data(Vec<u8>),

    /// The socket is non-blocking and no data is available right now.
    WouldBlock,

    /// The peer performed an orderly shutdown.
    ///
    /// The local socket has been closed in response.
    Eof,
}

/// A TCP socket.
///
/// `TcpSocket` covers both roles of a TCP endpoint: an outbound connection
/// ([`connect`](Self::connect)) and a listening socket
/// ([`bind`](Self::bind), [`listen`](Self::listen), [`accept`](Self::accept)).
/// Every blocking call takes an optional deadline; `None` or a zero
/// duration waits without an explicit bound.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use tether::net::{Recv, TcpSocket};
///
/// let mut socket = TcpSocket::new()?;
/// socket.connect("127.0.0.1", 8080, Some(Duration::from_secs(1)))?;
/// socket.send(b"ping", None)?;
///
/// if let Recv::Data(bytes) = socket.recv(64, Some(Duration::from_secs(1)))? {
///     println!("{} bytes", bytes.len());
/// }
/// # Ok::<(), tether::Error>(())
/// ```
#[derive(Debug)]
pub struct TcpSocket {
    socket: Socket,
}

impl TcpSocket {
    /// Creates an IPv4 TCP socket.
    pub fn new() -> Result<Self> {
        Self::with_family(AddressFamily::Inet)
    }

    /// Creates a TCP socket of the given family.
    pub fn with_family(family: AddressFamily) -> Result<Self> {
        let socket = Socket::new(family, SockType::Stream, ProtocolType::Tcp)?;
        Ok(Self { socket })
    }

    fn from_accepted(fd: RawFd, family: AddressFamily) -> Self {
        Self {
            socket: Socket::from_raw_parts(fd, family, SockType::Stream, ProtocolType::Tcp),
        }
    }

    /// The underlying generic socket.
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// The address family chosen at creation.
    pub fn address_family(&self) -> AddressFamily {
        self.socket.address_family()
    }

    /// Whether I/O calls wait for completion.
    pub fn is_blocking(&self) -> bool {
        self.socket.is_blocking()
    }

    /// Switches between blocking and non-blocking mode.
    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        self.socket.set_blocking(blocking)
    }

    /// Returns `true` once the socket has been closed.
    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }

    /// Releases the descriptor. Idempotent.
    pub fn close(&mut self) {
        self.socket.close();
    }

    /// Connects to `host:port`.
    ///
    /// The host is resolved now. The connection is started in non-blocking
    /// mode and its completion awaited with a readiness wait bounded by
    /// `deadline`; the socket's own blocking mode is restored afterwards.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] when the deadline elapses first;
    /// - [`ConnectionError::Refused`] when nothing listens on the port;
    /// - [`ConnectionError::Unresolved`] when the host has no usable address;
    /// - [`ConnectionError::Failed`] for any other connect failure.
    pub fn connect(&mut self, host: &str, port: u16, deadline: Option<Duration>) -> Result<()> {
        self.socket.raw_fd()?;
        let addr = Address::new(host, port).resolve(self.address_family())?;

        self.connect_addr(&addr, &Deadline::after(deadline))
    }

    /// Connects to an already resolved address within `deadline`.
    pub(crate) fn connect_addr(&mut self, addr: &SocketAddr, deadline: &Deadline) -> Result<()> {
        let fd = self.socket.raw_fd()?;

        debug!(fd, %addr, timeout = ?deadline.budget(), "connecting");

        let blocking = self.is_blocking();
        if blocking {
            sys_set_nonblocking(fd, true)?;
        }

        let outcome = complete_connect(fd, addr, deadline);

        let restored = if blocking {
            sys_set_nonblocking(fd, false)
        } else {
            Ok(())
        };

        settle_connect(outcome, restored)?;
        debug!(fd, %addr, "connected");

        Ok(())
    }

    /// Binds the socket to `host:port`.
    ///
    /// # Errors
    ///
    /// - [`Error::System`] with the OS error unmodified, such as
    ///   `EADDRINUSE`;
    /// - [`ConnectionError::Unresolved`] when the host has no address of the
    ///   socket's family. Name resolution is shared with
    ///   [`connect`](Self::connect) and reports the same way.
    pub fn bind(&mut self, host: &str, port: u16) -> Result<()> {
        let fd = self.socket.raw_fd()?;
        let addr = Address::new(host, port).resolve(self.address_family())?;

        sys_bind(fd, &addr)?;
        debug!(fd, %addr, "bound");

        Ok(())
    }

    /// Marks the socket as ready to accept connections.
    ///
    /// `None` uses the OS default backlog (`SOMAXCONN`).
    pub fn listen(&mut self, backlog: Option<u32>) -> Result<()> {
        let fd = self.socket.raw_fd()?;
        let backlog = backlog
            .map(|b| b.min(libc::c_int::MAX as u32) as libc::c_int)
            .unwrap_or(libc::SOMAXCONN);

        sys_listen(fd, backlog)?;
        debug!(fd, backlog, "listening");

        Ok(())
    }

    /// Accepts a connection.
    ///
    /// Blocks according to the current mode. The returned socket is a new,
    /// blocking, connected `TcpSocket` owned by the caller.
    pub fn accept(&self) -> Result<(TcpSocket, SocketAddr)> {
        let fd = self.socket.raw_fd()?;

        loop {
            match sys_accept(fd) {
                Ok((client, peer)) => {
                    debug!(fd, client, %peer, "accepted");
                    return Ok((Self::from_accepted(client, self.address_family()), peer));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::System(e)),
            }
        }
    }

    /// Accepts a connection, waiting at most `deadline`.
    ///
    /// Returns [`Error::Timeout`] when no connection arrives in time.
    pub fn accept_timeout(&self, deadline: Option<Duration>) -> Result<(TcpSocket, SocketAddr)> {
        let fd = self.socket.raw_fd()?;
        let deadline = Deadline::after(deadline);

        loop {
            if !wait_ready(fd, Interest::READABLE, deadline.instant())? {
                return Err(deadline.elapsed_error());
            }

            match sys_accept(fd) {
                Ok((client, peer)) => {
                    debug!(fd, client, %peer, "accepted");
                    return Ok((Self::from_accepted(client, self.address_family()), peer));
                }
                // The pending connection went away between the wait and the call.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(Error::System(e)),
            }
        }
    }

    /// Waits until a connection can be accepted or `waker` is signalled.
    ///
    /// Returns `Ok(false)` when woken; the signal is consumed.
    pub(crate) fn wait_acceptable(&self, waker: &Waker) -> Result<bool> {
        let fd = self.socket.raw_fd()?;
        let ready = wait_or_wake(fd, Interest::READABLE, waker)?;
        if !ready {
            waker.drain();
        }
        Ok(ready)
    }

    /// Receives at most `up_to` bytes.
    ///
    /// With a deadline, waits at most that long for data and fails with
    /// [`Error::Timeout`] otherwise. Without one, blocks according to the
    /// current mode; a non-blocking socket with nothing to read returns
    /// [`Recv::WouldBlock`].
    ///
    /// On [`Recv::Eof`] the socket is closed, so a read loop can run
    /// `while !socket.is_closed()`.
    pub fn recv(&mut self, up_to: usize, deadline: Option<Duration>) -> Result<Recv> {
        let fd = self.socket.raw_fd()?;

        if up_to == 0 {
            return Err(Error::System(io::Error::new(
                io::ErrorKind::InvalidInput,
                "recv needs room for at least one byte",
            )));
        }

        let deadline = Deadline::after(deadline);
        let mut buffer = vec![0u8; up_to];

        loop {
            if deadline.is_bounded() && !wait_ready(fd, Interest::READABLE, deadline.instant())? {
                return Err(deadline.elapsed_error());
            }

            match sys_recv(fd, &mut buffer, deadline.is_bounded()) {
                Ok(0) => {
                    debug!(fd, "peer closed the connection");
                    self.socket.close();
                    return Ok(Recv::Eof);
                }
                Ok(n) => {
                    trace!(fd, bytes = n, "received");
                    buffer.truncate(n);
                    return Ok(Recv::Data(buffer));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if deadline.is_bounded() {
                        continue;
                    }
                    return Ok(Recv::WouldBlock);
                }
                Err(e) => return Err(Error::System(e)),
            }
        }
    }

    /// Sends all of `bytes`.
    ///
    /// Partial writes are retried until the whole buffer is sent. The
    /// deadline covers the entire call, not each individual write.
    pub fn send(&mut self, bytes: &[u8], deadline: Option<Duration>) -> Result<()> {
        let fd = self.socket.raw_fd()?;
        let deadline = Deadline::after(deadline);
        let mut written = 0;

        while written < bytes.len() {
            if deadline.is_bounded() && !wait_ready(fd, Interest::WRITABLE, deadline.instant())? {
                return Err(deadline.elapsed_error());
            }

            match sys_send(fd, &bytes[written..], deadline.is_bounded()) {
                Ok(0) => {
                    return Err(Error::System(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "send wrote zero bytes",
                    )));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !deadline.is_bounded() {
                        wait_ready(fd, Interest::WRITABLE, None)?;
                    }
                }
                Err(e) => return Err(Error::System(e)),
            }
        }

        trace!(fd, bytes = written, "sent");
        Ok(())
    }

    /// Shuts down the read, write, or both halves of the connection.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        let fd = self.socket.raw_fd()?;
        Ok(sys_shutdown(fd, how)?)
    }

    /// The local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let fd = self.socket.raw_fd()?;
        Ok(sys_sockname(fd)?)
    }

    /// The address of the connected peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        let fd = self.socket.raw_fd()?;
        Ok(sys_peername(fd)?)
    }

    /// Toggles `TCP_NODELAY`.
    pub fn set_nodelay(&self, enabled: bool) -> Result<()> {
        let fd = self.socket.raw_fd()?;
        Ok(sys_set_nodelay(fd, enabled)?)
    }

    /// Toggles `SO_REUSEADDR`. Must be set before [`bind`](Self::bind).
    pub fn set_reuse_address(&self, enabled: bool) -> Result<()> {
        let fd = self.socket.raw_fd()?;
        Ok(sys_set_reuseaddr(fd, enabled)?)
    }
}

/// Drives a non-blocking connect to completion within `deadline`.
fn complete_connect(fd: RawFd, addr: &SocketAddr, deadline: &Deadline) -> Result<()> {
    match sys_connect(fd, addr) {
        Ok(()) => return Ok(()),
        Err(e)
            if e.raw_os_error() == Some(libc::EINPROGRESS)
                || e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::Interrupted => {}
        Err(e) => return Err(connect_error(e)),
    }

    if !wait_ready(fd, Interest::WRITABLE, deadline.instant())? {
        return Err(deadline.elapsed_error());
    }

    sys_get_socket_error(fd).map_err(connect_error)
}

/// The connect failure wins over a failure to restore the blocking mode.
fn settle_connect(outcome: Result<()>, restored: io::Result<()>) -> Result<()> {
    outcome?;
    Ok(restored?)
}

fn connect_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ConnectionError::Refused(e).into(),
        _ => ConnectionError::Failed(e).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failure_takes_precedence_over_restore_failure() {
        let refused = connect_error(io::Error::from_raw_os_error(libc::ECONNREFUSED));
        let restore = Err(io::Error::from_raw_os_error(libc::EBADF));

        let err = settle_connect(Err(refused), restore).unwrap_err();
        assert!(
            matches!(err, Error::Connection(ConnectionError::Refused(_))),
            "unexpected error: {err}"
        );

        let timeout = Error::Timeout(Duration::from_millis(10));
        let err = settle_connect(Err(timeout), Ok(())).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn restore_failure_surfaces_after_a_successful_connect() {
        let restore = Err(io::Error::from_raw_os_error(libc::EBADF));

        let err = settle_connect(Ok(()), restore).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }
}

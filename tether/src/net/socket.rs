use super::kind::{AddressFamily, ProtocolType, SockType};
use crate::error::{Error, Result};
use crate::sys::platform::{sys_close, sys_set_nonblocking, sys_set_v6only, sys_socket};

use std::fmt;
use std::os::fd::RawFd;
use tracing::debug;

/// An owned OS socket.
///
/// A `Socket` holds exactly one descriptor from creation until it is
/// closed, either explicitly with [`close`](Self::close) or when the
/// value is dropped. Once closed, every operation other than `close`
/// fails with [`Error::Closed`].
///
/// Sockets start in blocking mode.
pub struct Socket {
    /// The descriptor, `None` once closed.
    fd: Option<RawFd>,

    family: AddressFamily,
    sock_type: SockType,
    protocol: ProtocolType,

    /// Last mode set with `set_blocking`.
    blocking: bool,
}

impl Socket {
    /// Creates a new socket.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameters`] when `sock_type` cannot carry
    ///   `protocol` (for example a stream socket with UDP);
    /// - [`Error::System`] when the OS refuses to create the socket.
    pub fn new(family: AddressFamily, sock_type: SockType, protocol: ProtocolType) -> Result<Self> {
        if sock_type.protocol() != protocol {
            return Err(Error::InvalidParameters {
                family,
                sock_type,
                protocol,
            });
        }

        let fd = sys_socket(family.as_raw(), sock_type.as_raw(), protocol.as_raw())?;
        let socket = Self::from_raw_parts(fd, family, sock_type, protocol);

        if family == AddressFamily::Inet6 {
            sys_set_v6only(fd, false)?;
        }

        debug!(fd, %family, %sock_type, %protocol, "socket created");

        Ok(socket)
    }

    /// Adopts a descriptor that is already open and in blocking mode.
    pub(crate) fn from_raw_parts(
        fd: RawFd,
        family: AddressFamily,
        sock_type: SockType,
        protocol: ProtocolType,
    ) -> Self {
        Self {
            fd: Some(fd),
            family,
            sock_type,
            protocol,
            blocking: true,
        }
    }

    /// The address family chosen at creation.
    pub fn address_family(&self) -> AddressFamily {
        self.family
    }

    /// The socket type chosen at creation.
    pub fn sock_type(&self) -> SockType {
        self.sock_type
    }

    /// The protocol chosen at creation.
    pub fn protocol_type(&self) -> ProtocolType {
        self.protocol
    }

    /// Whether I/O calls wait for completion.
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Returns `true` once the socket has been closed.
    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }

    /// Switches between blocking and non-blocking mode.
    ///
    /// The setting persists until changed again or the socket is closed.
    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        let fd = self.raw_fd()?;

        sys_set_nonblocking(fd, !blocking)?;
        self.blocking = blocking;

        Ok(())
    }

    /// The underlying descriptor.
    ///
    /// The descriptor stays owned by this socket; do not close it.
    pub fn raw_fd(&self) -> Result<RawFd> {
        self.fd.ok_or(Error::Closed)
    }

    /// Releases the descriptor.
    ///
    /// Closing is idempotent: later calls do nothing.
    pub fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            sys_close(fd);
            debug!(fd, "socket closed");
        }
    }
}

impl Drop for Socket {
    /// Closes the descriptor if it is still open.
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("fd", &self.fd)
            .field("family", &self.family)
            .field("sock_type", &self.sock_type)
            .field("protocol", &self.protocol)
            .field("blocking", &self.blocking)
            .finish()
    }
}

use super::socket::{Recv, TcpSocket};
use crate::error::{ConnectionError, Error, Result};
use crate::net::address::Address;
use crate::net::kind::AddressFamily;
use crate::time::Deadline;

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;
use tracing::debug;

/// Read size used by callers that have no better estimate.
pub const DEFAULT_READ_SIZE: usize = 1024;

/// A bidirectional byte stream.
///
/// Reads and writes are independent; each call takes its own deadline.
pub trait DuplexStream {
    /// Opens the stream. Only meaningful for streams that start unconnected.
    fn open(&mut self, deadline: Option<Duration>) -> Result<()>;

    /// Reads at most `up_to` bytes. An empty result means end of stream.
    fn read(&mut self, up_to: usize, deadline: Option<Duration>) -> Result<Vec<u8>>;

    /// Writes all of `bytes`.
    fn write(&mut self, bytes: &[u8], deadline: Option<Duration>) -> Result<()>;

    /// Closes the stream. Idempotent.
    fn close(&mut self);

    /// Returns `true` once the stream has been closed, by either side.
    fn is_closed(&self) -> bool;
}

/// A TCP connection.
///
/// A stream is created in one of two modes:
///
/// - **client**: [`TcpStream::new`] / [`TcpStream::connect_to`] store a
///   target address; the stream is unconnected until
///   [`open`](Self::open) succeeds;
/// - **server**: [`TcpStream::from_socket`] wraps a socket that is already
///   connected, typically one returned by [`TcpSocket::accept`].
///
/// The stream owns its socket and closes it when dropped.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use tether::net::TcpStream;
///
/// let mut stream = TcpStream::new("127.0.0.1", 8080)?;
/// stream.open(Some(Duration::from_secs(2)))?;
///
/// let mut received = Vec::new();
/// while !stream.is_closed() {
///     received.extend(stream.read(1024, None)?);
/// }
/// # Ok::<(), tether::Error>(())
/// ```
#[derive(Debug)]
pub struct TcpStream {
    socket: TcpSocket,

    /// Target of a client-mode stream.
    address: Option<Address>,

    /// Whether `open` already succeeded.
    connected: bool,

    /// Whether a read observed the peer's shutdown.
    at_eof: bool,
}

impl TcpStream {
    /// Creates an unconnected client stream targeting `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::connect_to(Address::new(host, port))
    }

    /// Creates an unconnected client stream targeting `address`.
    ///
    /// The socket family follows [`Address::preferred_family`].
    pub fn connect_to(address: Address) -> Result<Self> {
        let socket = TcpSocket::with_family(address.preferred_family())?;

        Ok(Self {
            socket,
            address: Some(address),
            connected: false,
            at_eof: false,
        })
    }

    /// Wraps an already-connected socket.
    ///
    /// The socket is switched to blocking mode; the stream has no target
    /// address and [`open`](Self::open) fails on it.
    pub fn from_socket(mut socket: TcpSocket) -> Result<Self> {
        if !socket.is_blocking() {
            socket.set_blocking(true)?;
        }

        Ok(Self {
            socket,
            address: None,
            connected: true,
            at_eof: false,
        })
    }

    /// Connects a client stream to its target address.
    ///
    /// The host is resolved now and every candidate is tried in resolver
    /// order, switching the socket family when a candidate needs it. All
    /// attempts draw on the same `deadline`.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::CouldNotOpen`] for a server-mode stream or one that
    /// is already connected; [`Error::Timeout`] once the deadline elapses;
    /// otherwise the error of the last candidate tried, as reported by
    /// [`TcpSocket::connect`].
    pub fn open(&mut self, deadline: Option<Duration>) -> Result<()> {
        let address = match &self.address {
            Some(address) if !self.connected => address.clone(),
            _ => return Err(ConnectionError::CouldNotOpen.into()),
        };

        self.socket.socket().raw_fd()?;

        let candidates = address.resolve_all()?;
        self.connect_any(&candidates, &Deadline::after(deadline))?;
        self.connected = true;

        Ok(())
    }

    /// Tries `candidates` in order until one accepts the connection.
    ///
    /// A failed attempt leaves its socket unusable on some platforms, so
    /// every retry starts from a fresh socket.
    fn connect_any(&mut self, candidates: &[SocketAddr], deadline: &Deadline) -> Result<()> {
        let mut last_error = None;

        for (attempt, addr) in candidates.iter().enumerate() {
            let family = AddressFamily::of(addr);
            if attempt > 0 || self.socket.address_family() != family {
                match TcpSocket::with_family(family) {
                    Ok(socket) => self.socket = socket,
                    // The host may lack support for this family.
                    Err(e) => {
                        debug!(%addr, error = %e, "cannot create socket for candidate");
                        last_error = Some(e);
                        continue;
                    }
                }
            }

            match self.socket.connect_addr(addr, deadline) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_connection() => {
                    debug!(%addr, error = %e, "candidate failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ConnectionError::CouldNotOpen.into()))
    }

    /// Reads at most `up_to` bytes.
    ///
    /// Returns an empty vector only when the peer closed the connection, at
    /// which point the stream is closed as well.
    pub fn read(&mut self, up_to: usize, deadline: Option<Duration>) -> Result<Vec<u8>> {
        match self.socket.recv(up_to, deadline)? {
            Recv::Data(bytes) => Ok(bytes),
            Recv::Eof => {
                self.at_eof = true;
                Ok(Vec::new())
            }
            Recv::WouldBlock => Err(Error::System(io::ErrorKind::WouldBlock.into())),
        }
    }

    /// Writes all of `bytes`.
    pub fn write(&mut self, bytes: &[u8], deadline: Option<Duration>) -> Result<()> {
        self.socket.send(bytes, deadline)
    }

    /// Closes the stream. Idempotent.
    pub fn close(&mut self) {
        self.socket.close();
    }

    /// Returns `true` once the stream has been closed.
    ///
    /// Reflects the socket at call time, so it turns `true` as soon as a
    /// read observes the peer's shutdown.
    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }

    /// The target address of a client-mode stream.
    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    /// The local address of the connection.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The address of the peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.socket.peer_addr()
    }

    /// Shuts down the read, write, or both halves of the connection.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        self.socket.shutdown(how)
    }

    /// The socket backing this stream.
    pub fn socket(&self) -> &TcpSocket {
        &self.socket
    }
}

impl DuplexStream for TcpStream {
    fn open(&mut self, deadline: Option<Duration>) -> Result<()> {
        TcpStream::open(self, deadline)
    }

    fn read(&mut self, up_to: usize, deadline: Option<Duration>) -> Result<Vec<u8>> {
        TcpStream::read(self, up_to, deadline)
    }

    fn write(&mut self, bytes: &[u8], deadline: Option<Duration>) -> Result<()> {
        TcpStream::write(self, bytes, deadline)
    }

    fn close(&mut self) {
        TcpStream::close(self);
    }

    fn is_closed(&self) -> bool {
        TcpStream::is_closed(self)
    }
}

impl io::Read for TcpStream {
    /// Reads into `buffer`; `Ok(0)` signals end of stream.
    ///
    /// Once the peer's shutdown has been observed, further reads keep
    /// returning `Ok(0)` instead of a closed error.
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }

        if self.at_eof {
            return Ok(0);
        }

        let bytes = TcpStream::read(self, buffer.len(), None)?;
        buffer[..bytes.len()].copy_from_slice(&bytes);

        Ok(bytes.len())
    }
}

impl io::Write for TcpStream {
    fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
        TcpStream::write(self, buffer, None)?;
        Ok(buffer.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

    fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        listener.local_addr().expect("Failed to get local address")
    }

    #[test]
    fn open_falls_through_refusing_candidates() {
        let refusing = closed_port();
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let listening = listener.local_addr().expect("Failed to get local address");

        let mut stream = TcpStream::new("127.0.0.1", listening.port()).unwrap();
        stream
            .connect_any(&[refusing, listening], &Deadline::after(TIMEOUT))
            .unwrap();

        assert_eq!(stream.peer_addr().unwrap(), listening);
        assert!(stream.socket().is_blocking());
    }

    #[test]
    fn open_reports_the_last_candidate_error() {
        let mut stream = TcpStream::new("127.0.0.1", 9).unwrap();
        let err = stream
            .connect_any(&[closed_port(), closed_port()], &Deadline::after(TIMEOUT))
            .unwrap_err();

        assert!(
            matches!(err, Error::Connection(ConnectionError::Refused(_))),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn open_switches_to_ipv6_for_ipv6_candidates() {
        // Hosts without IPv6 loopback cannot run this check.
        let Ok(listener) = TcpListener::bind("[::1]:0") else {
            return;
        };
        let listening = listener.local_addr().expect("Failed to get local address");

        let mut stream = TcpStream::new("localhost", listening.port()).unwrap();
        assert_eq!(stream.socket().address_family(), AddressFamily::Inet);

        stream
            .connect_any(&[closed_port(), listening], &Deadline::after(TIMEOUT))
            .unwrap();

        assert_eq!(stream.socket().address_family(), AddressFamily::Inet6);
        assert_eq!(stream.peer_addr().unwrap(), listening);
    }
}

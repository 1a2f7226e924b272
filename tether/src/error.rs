//! Error types.

use crate::net::{AddressFamily, ProtocolType, ServerState, SockType};

use std::io;
use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by sockets, streams and servers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A connection could not be opened or established.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The deadline of a blocking call elapsed before it completed.
    ///
    /// The socket stays open; the caller decides whether to retry or close.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The socket, stream or server was already closed.
    #[error("socket is closed")]
    Closed,

    /// An operating system failure with no more specific mapping.
    #[error("system error: {0}")]
    System(#[from] io::Error),

    /// A server lifecycle method was called from the wrong state.
    #[error("cannot {operation} a server that is {state}")]
    State {
        /// The rejected operation.
        operation: &'static str,
        /// The state the server was in.
        state: ServerState,
    },

    /// The socket type and protocol do not belong together.
    #[error("{sock_type} sockets cannot carry {protocol} ({family})")]
    InvalidParameters {
        /// Requested address family.
        family: AddressFamily,
        /// Requested socket type.
        sock_type: SockType,
        /// Requested protocol.
        protocol: ProtocolType,
    },
}

/// Reasons a connection could not be established.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The stream has no target address or is already connected.
    #[error("could not open stream")]
    CouldNotOpen,

    /// The peer actively refused the connection.
    #[error("connection refused")]
    Refused(#[source] io::Error),

    /// The host did not resolve to an address usable by the socket.
    #[error("could not resolve {host}:{port}")]
    Unresolved {
        /// Host that failed to resolve.
        host: String,
        /// Requested port.
        port: u16,
    },

    /// Any other failure while connecting.
    #[error("connection failed")]
    Failed(#[source] io::Error),
}

impl Error {
    /// Returns `true` for [`Error::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Returns `true` for [`Error::Closed`].
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// Returns `true` for [`Error::Connection`].
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// The OS error code behind this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::System(e) => e.raw_os_error(),
            Error::Connection(ConnectionError::Refused(e) | ConnectionError::Failed(e)) => {
                e.raw_os_error()
            }
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::System(e) => e,
            Error::Connection(ConnectionError::Refused(e) | ConnectionError::Failed(e)) => e,
            Error::Timeout(_) => io::Error::new(io::ErrorKind::TimedOut, error),
            Error::Closed => io::Error::new(io::ErrorKind::NotConnected, error),
            Error::Connection(_) => io::Error::new(io::ErrorKind::NotConnected, error),
            Error::State { .. } | Error::InvalidParameters { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, error)
            }
        }
    }
}

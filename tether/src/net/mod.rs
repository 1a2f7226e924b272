//! TCP networking primitives.
//!
//! This module provides blocking socket types whose I/O calls accept an
//! optional deadline. Waiting is done with readiness polling, so a
//! deadline behaves the same on every Unix target.
//!
//! It exposes:
//! - [`Address`] and the creation parameters [`AddressFamily`],
//!   [`SockType`] and [`ProtocolType`],
//! - [`Socket`], an owned OS socket,
//! - [`TcpSocket`], [`TcpStream`] and [`TcpServer`] for TCP.
mod address;
mod kind;
mod socket;
pub(crate) mod tcp;

pub use address::{Address, AddressParseError};
pub use kind::{AddressFamily, ProtocolType, SockType};
pub use socket::Socket;
pub use tcp::builder::{FatalErrorSink, ServerBuilder, ServerConfig};
pub use tcp::server::{Handler, ServerState, TcpServer};
pub use tcp::socket::{Recv, TcpSocket};
pub use tcp::stream::{DEFAULT_READ_SIZE, DuplexStream, TcpStream};

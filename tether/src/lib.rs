//! # Tether
//!
//! **Tether** is a small blocking TCP library for Rust: a thin, owned wrapper
//! over raw OS sockets with deadline-bounded I/O and a thread-per-connection
//! server.
//!
//! Unlike `std::net`, every blocking call takes an optional deadline and
//! waits with readiness polling rather than socket timeout options, so
//! timeouts behave identically across Unix platforms. It offers:
//!
//! - an owned [`Socket`](net::Socket) with explicit family, type and
//!   protocol, and switchable blocking mode
//! - a [`TcpSocket`](net::TcpSocket) with deadline-bounded
//!   `connect`/`accept`/`recv`/`send`
//! - a [`TcpStream`](net::TcpStream) implementing the
//!   [`DuplexStream`](net::DuplexStream) contract plus `std::io::{Read, Write}`
//! - a [`TcpServer`](net::TcpServer) that runs a handler per connection on its
//!   own thread and shuts down gracefully from any thread
//!
//! Operations report failures through [`Error`]; events are emitted through
//! [`tracing`] and no subscriber is installed by the library.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tether::net::{TcpServer, TcpStream};
//!
//! let server = Arc::new(TcpServer::new(|mut stream| {
//!     stream.write(b"hello", None)?;
//!     stream.close();
//!     Ok(())
//! })?);
//! server.bind("127.0.0.1", 0)?;
//! let accept_loop = server.start()?;
//!
//! let port = server.local_addr().map(|a| a.port()).unwrap_or_default();
//! let mut client = TcpStream::new("127.0.0.1", port)?;
//! client.open(Some(Duration::from_secs(1)))?;
//!
//! let mut received = Vec::new();
//! while !client.is_closed() {
//!     received.extend(client.read(1024, Some(Duration::from_secs(1)))?);
//! }
//! assert_eq!(received, b"hello");
//!
//! server.terminate()?;
//! accept_loop.join().expect("accept loop panicked")?;
//! # Ok::<(), tether::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`net`]: Sockets, streams and the server
//! - [`time`]: Deadline bookkeeping
//! - [`error`]: The crate error type

#[cfg(not(unix))]
compile_error!("tether only supports Unix targets");

mod sys;

pub mod error;
pub mod net;
pub mod time;

pub use error::{ConnectionError, Error, Result};

//! TCP networking implementation.
//!
//! This module contains the concrete TCP types built on top of
//! [`Socket`](crate::net::Socket) and the platform layer.
//!
//! It is split into:
//! - [`socket`]: the raw TCP socket with deadline-bounded operations,
//! - [`stream`]: the duplex byte stream over a connected socket,
//! - [`server`]: the accept loop dispatching connections to a handler,
//! - [`builder`]: server configuration.

pub mod builder;
pub mod server;
pub mod socket;
pub mod stream;

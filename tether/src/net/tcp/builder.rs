use super::server::TcpServer;
use super::stream::TcpStream;
use crate::error::{Error, Result};
use crate::net::kind::AddressFamily;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback receiving the error that stopped an accept loop.
pub type FatalErrorSink = Arc<dyn Fn(&Error) + Send + Sync>;

/// Settings of a [`TcpServer`].
#[derive(Clone)]
pub struct ServerConfig {
    /// Listen backlog; `None` uses `SOMAXCONN`.
    pub(crate) backlog: Option<u32>,

    /// Family of the listening socket.
    pub(crate) family: AddressFamily,

    /// Whether `SO_REUSEADDR` is set before binding.
    pub(crate) reuse_address: bool,

    /// Prefix for the names of the accept and handler threads.
    pub(crate) thread_name: String,

    /// How long `terminate` waits for the accept loop to stop.
    pub(crate) shutdown_timeout: Duration,

    /// Receives fatal accept-loop errors.
    pub(crate) on_fatal: Option<FatalErrorSink>,
}

impl ServerConfig {
    /// The configured listen backlog.
    pub fn backlog(&self) -> Option<u32> {
        self.backlog
    }

    /// Family of the listening socket.
    pub fn address_family(&self) -> AddressFamily {
        self.family
    }

    /// Whether `SO_REUSEADDR` is set before binding.
    pub fn reuse_address(&self) -> bool {
        self.reuse_address
    }

    /// Prefix for thread names.
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// How long `terminate` waits for the accept loop to stop.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backlog: None,
            family: AddressFamily::Inet,
            reuse_address: true,
            thread_name: String::from("tether"),
            shutdown_timeout: Duration::from_secs(5),
            on_fatal: None,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("backlog", &self.backlog)
            .field("family", &self.family)
            .field("reuse_address", &self.reuse_address)
            .field("thread_name", &self.thread_name)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("on_fatal", &self.on_fatal.is_some())
            .finish()
    }
}

/// Builder for configuring and creating a server.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use tether::net::{AddressFamily, ServerBuilder};
///
/// let server = ServerBuilder::new()
///     .address_family(AddressFamily::Inet6)
///     .backlog(64)
///     .shutdown_timeout(Duration::from_secs(1))
///     .on_fatal(|error| eprintln!("accept loop stopped: {error}"))
///     .build(|mut stream| {
///         stream.write(b"hello", None)?;
///         stream.close();
///         Ok(())
///     })?;
/// # Ok::<(), tether::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listen backlog.
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.backlog = Some(backlog);
        self
    }

    /// Sets the family of the listening socket.
    pub fn address_family(mut self, family: AddressFamily) -> Self {
        self.config.family = family;
        self
    }

    /// Sets whether `SO_REUSEADDR` is enabled before binding.
    pub fn reuse_address(mut self, enabled: bool) -> Self {
        self.config.reuse_address = enabled;
        self
    }

    /// Sets the prefix used to name the accept and handler threads.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Sets how long `terminate` waits for the accept loop to stop.
    ///
    /// # Panics
    ///
    /// Panics if `timeout` is zero.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        assert!(!timeout.is_zero(), "shutdown_timeout must be > 0");

        self.config.shutdown_timeout = timeout;
        self
    }

    /// Installs a callback for errors that stop the accept loop.
    pub fn on_fatal<F>(mut self, sink: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.config.on_fatal = Some(Arc::new(sink));
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Builds a server running `handler` for every accepted connection.
    pub fn build<F>(self, handler: F) -> Result<TcpServer>
    where
        F: Fn(TcpStream) -> Result<()> + Send + Sync + 'static,
    {
        TcpServer::with_config(self.config, handler)
    }
}

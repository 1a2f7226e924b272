use super::builder::{ServerBuilder, ServerConfig};
use super::socket::TcpSocket;
use super::stream::TcpStream;
use crate::error::{Error, Result};
use crate::sys::Waker;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Pause after an accept failure caused by descriptor or memory exhaustion.
const EXHAUSTION_BACKOFF: Duration = Duration::from_millis(50);

/// Per-connection callback of a [`TcpServer`].
pub type Handler = dyn Fn(TcpStream) -> Result<()> + Send + Sync;

/// Lifecycle of a [`TcpServer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Constructed, no socket bound yet.
    Created,
    /// Listening socket bound to an address.
    Bound,
    /// `listen(2)` issued, accept loop not yet iterating.
    Listening,
    /// Accept loop running.
    Accepting,
    /// Accept loop stopped and listening socket closed.
    Terminated,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServerState::Created => "created",
            ServerState::Bound => "bound",
            ServerState::Listening => "listening",
            ServerState::Accepting => "accepting",
            ServerState::Terminated => "terminated",
        })
    }
}

struct Inner {
    state: ServerState,

    /// Bound socket, handed to the accept loop by `listen`/`start`.
    listener: Option<TcpSocket>,

    local_addr: Option<SocketAddr>,
}

/// A thread-per-connection TCP server.
///
/// The server accepts connections on one socket and runs the handler for
/// each of them on its own thread, so a slow connection never holds up the
/// accept loop or the other connections. A handler returning an error is
/// logged and does not affect the server.
///
/// [`terminate`](Self::terminate) may be called from any thread. It signals
/// the accept loop through a wake-up channel polled next to the listening
/// socket; the loop then closes the socket itself, so no descriptor is ever
/// closed while another thread is blocked on it.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tether::net::TcpServer;
///
/// let server = Arc::new(TcpServer::new(|mut stream| {
///     stream.write(b"hello", None)?;
///     stream.close();
///     Ok(())
/// })?);
///
/// server.bind("127.0.0.1", 0)?;
/// let accept_loop = server.start()?;
///
/// // ...
///
/// server.terminate()?;
/// accept_loop.join().expect("accept loop panicked")?;
/// # Ok::<(), tether::Error>(())
/// ```
pub struct TcpServer {
    handler: Arc<Handler>,
    config: ServerConfig,

    inner: Mutex<Inner>,

    /// Signalled on every state change.
    changed: Condvar,

    terminating: AtomicBool,
    waker: Waker,
}

impl TcpServer {
    /// Creates a server with the default configuration.
    pub fn new<F>(handler: F) -> Result<Self>
    where
        F: Fn(TcpStream) -> Result<()> + Send + Sync + 'static,
    {
        Self::with_config(ServerConfig::default(), handler)
    }

    /// Returns a builder for a custom configuration.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn with_config<F>(config: ServerConfig, handler: F) -> Result<Self>
    where
        F: Fn(TcpStream) -> Result<()> + Send + Sync + 'static,
    {
        Ok(Self {
            handler: Arc::new(handler),
            config,
            inner: Mutex::new(Inner {
                state: ServerState::Created,
                listener: None,
                local_addr: None,
            }),
            changed: Condvar::new(),
            terminating: AtomicBool::new(false),
            waker: Waker::new()?,
        })
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.lock().state
    }

    /// The address the server is bound to, once bound.
    ///
    /// Useful to learn the port picked by the OS after binding port `0`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    /// Binds the listening socket to `host:port`.
    ///
    /// # Errors
    ///
    /// [`Error::State`] unless the server was just created; otherwise the
    /// errors of [`TcpSocket::bind`].
    pub fn bind(&self, host: &str, port: u16) -> Result<()> {
        let mut inner = self.lock();

        if inner.state != ServerState::Created {
            return Err(Error::State {
                operation: "bind",
                state: inner.state,
            });
        }

        let mut listener = TcpSocket::with_family(self.config.family)?;
        listener.set_reuse_address(self.config.reuse_address)?;
        listener.bind(host, port)?;

        inner.local_addr = Some(listener.local_addr()?);
        inner.listener = Some(listener);
        self.set_state(&mut inner, ServerState::Bound);

        Ok(())
    }

    /// Starts listening and runs the accept loop on the calling thread.
    ///
    /// Returns `Ok(())` once [`terminate`](Self::terminate) stopped the loop,
    /// or the error that stopped it otherwise.
    pub fn listen(&self) -> Result<()> {
        let listener = self.begin_listening()?;
        self.run(listener)
    }

    /// Starts listening and runs the accept loop on a dedicated thread.
    ///
    /// The server is listening when this returns, so connections made
    /// afterwards are queued even if the loop has not been scheduled yet.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<Result<()>>> {
        let listener = self.begin_listening()?;
        let server = Arc::clone(self);

        let spawned = thread::Builder::new()
            .name(format!("{}-accept", self.config.thread_name))
            .spawn(move || server.run(listener));

        spawned.map_err(|e| {
            self.finish();
            Error::System(e)
        })
    }

    /// Stops the accept loop and closes the listening socket.
    ///
    /// Waits up to the configured shutdown timeout for the loop to exit.
    /// Connections already handed to handlers are not affected. Calling it
    /// again after termination does nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::State`] if the server is not listening yet;
    /// - [`Error::Timeout`] if the loop did not stop in time.
    pub fn terminate(&self) -> Result<()> {
        let inner = self.lock();

        match inner.state {
            ServerState::Created | ServerState::Bound => {
                return Err(Error::State {
                    operation: "terminate",
                    state: inner.state,
                });
            }
            ServerState::Terminated => return Ok(()),
            ServerState::Listening | ServerState::Accepting => {}
        }

        debug!(state = %inner.state, "terminating server");

        self.terminating.store(true, Ordering::Release);
        self.waker.wake()?;

        let timeout = self.config.shutdown_timeout;
        let (_inner, wait) = self
            .changed
            .wait_timeout_while(inner, timeout, |inner| {
                inner.state != ServerState::Terminated
            })
            .unwrap_or_else(PoisonError::into_inner);

        if wait.timed_out() {
            return Err(Error::Timeout(timeout));
        }

        Ok(())
    }

    fn begin_listening(&self) -> Result<TcpSocket> {
        let mut inner = self.lock();

        let state_error = Error::State {
            operation: "listen",
            state: inner.state,
        };

        if inner.state != ServerState::Bound {
            return Err(state_error);
        }
        let Some(mut listener) = inner.listener.take() else {
            return Err(state_error);
        };

        // The loop waits for readiness itself; a non-blocking listener keeps a
        // connection aborted between the wait and `accept` from blocking it.
        if let Err(e) = listener
            .listen(self.config.backlog)
            .and_then(|()| listener.set_blocking(false))
        {
            inner.listener = Some(listener);
            return Err(e);
        }

        self.set_state(&mut inner, ServerState::Listening);

        Ok(listener)
    }

    fn run(&self, mut listener: TcpSocket) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state == ServerState::Listening {
                self.set_state(&mut inner, ServerState::Accepting);
            }
        }

        debug!(addr = ?self.local_addr(), "accept loop started");

        let outcome = self.accept_loop(&listener);
        listener.close();

        match &outcome {
            Ok(()) => debug!("accept loop stopped"),
            Err(e) => {
                error!(error = %e, "accept loop failed");
                if let Some(sink) = &self.config.on_fatal {
                    sink(e);
                }
            }
        }

        self.finish();
        outcome
    }

    fn accept_loop(&self, listener: &TcpSocket) -> Result<()> {
        loop {
            if self.terminating.load(Ordering::Acquire) {
                return Ok(());
            }

            if !listener.wait_acceptable(&self.waker)? {
                continue;
            }

            match listener.accept() {
                Ok((socket, peer)) => self.dispatch(socket, peer),
                Err(Error::System(e)) if is_transient(&e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        warn!(error = %e, "accept failed, continuing");
                    }
                    if is_exhaustion(&e) {
                        thread::sleep(EXHAUSTION_BACKOFF);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs the handler for one connection on its own thread.
    fn dispatch(&self, socket: TcpSocket, peer: SocketAddr) {
        let stream = match TcpStream::from_socket(socket) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%peer, error = %e, "dropping connection");
                return;
            }
        };

        let handler = Arc::clone(&self.handler);

        let spawned = thread::Builder::new()
            .name(format!("{}-conn", self.config.thread_name))
            .spawn(move || {
                debug!(%peer, "handling connection");
                if let Err(e) = handler(stream) {
                    warn!(%peer, error = %e, "connection handler failed");
                }
            });

        if let Err(e) = spawned {
            warn!(%peer, error = %e, "could not spawn connection handler");
        }
    }

    fn finish(&self) {
        let mut inner = self.lock();
        inner.listener = None;
        self.set_state(&mut inner, ServerState::Terminated);
    }

    fn set_state(&self, inner: &mut MutexGuard<'_, Inner>, state: ServerState) {
        inner.state = state;
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();

        f.debug_struct("TcpServer")
            .field("state", &inner.state)
            .field("local_addr", &inner.local_addr)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Accept failures that concern a single connection or a passing shortage.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    ) || matches!(e.raw_os_error(), Some(libc::EPROTO | libc::EPERM)) || is_exhaustion(e)
}

fn is_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn classifies_accept_errors() {
        assert!(is_transient(&io::Error::from_raw_os_error(libc::ECONNABORTED)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_exhaustion(&io::Error::from_raw_os_error(libc::ENFILE)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EBADF)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EINVAL)));
    }

    #[test]
    fn fatal_accept_error_stops_the_loop_and_reaches_the_sink() {
        let fired = Arc::new(AtomicUsize::new(0));
        let reported = Arc::new(Mutex::new(None));

        let config = {
            let fired = Arc::clone(&fired);
            let reported = Arc::clone(&reported);
            ServerBuilder::new()
                .on_fatal(move |error| {
                    fired.fetch_add(1, Ordering::SeqCst);
                    *reported.lock().unwrap() = Some(error.to_string());
                })
                .config()
                .clone()
        };

        let server = TcpServer::with_config(config, |_| Ok(())).unwrap();
        server.bind("127.0.0.1", 0).unwrap();

        let mut listener = server.begin_listening().unwrap();
        assert_eq!(server.state(), ServerState::Listening);
        listener.close();

        let err = server.run(listener).unwrap_err();
        assert!(err.is_closed(), "unexpected error: {err}");

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(
            reported.lock().unwrap().as_deref(),
            Some(Error::Closed.to_string().as_str())
        );
        assert_eq!(server.state(), ServerState::Terminated);
        server.terminate().unwrap();
    }
}

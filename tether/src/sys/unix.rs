use libc::{
    AF_INET, AF_INET6, F_GETFL, F_SETFL, IPPROTO_IPV6, IPPROTO_TCP, IPV6_V6ONLY, O_NONBLOCK,
    SHUT_RD, SHUT_RDWR, SHUT_WR, SO_ERROR, SO_REUSEADDR, SOL_SOCKET, TCP_NODELAY, c_int, c_void,
    close, connect, fcntl, getpeername, getsockname, getsockopt, listen, recv, send, setsockopt,
    shutdown, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socket, socklen_t,
};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::{io, mem};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

/// Converts a C return code into an `io::Result`.
fn cvt(rc: c_int) -> io::Result<c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// Closes a file descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Switches `O_NONBLOCK` on or off for a descriptor.
pub(crate) fn sys_set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = cvt(unsafe { fcntl(fd, F_GETFL) })?;

    let updated = if nonblocking {
        flags | O_NONBLOCK
    } else {
        flags & !O_NONBLOCK
    };

    if updated != flags {
        cvt(unsafe { fcntl(fd, F_SETFL, updated) })?;
    }

    Ok(())
}

/// Marks a descriptor close-on-exec.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn sys_set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { fcntl(fd, libc::F_GETFD) })?;
    cvt(unsafe { fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) })?;
    Ok(())
}

/// Creates a blocking, close-on-exec socket.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn sys_socket(domain: c_int, ty: c_int, protocol: c_int) -> io::Result<RawFd> {
    cvt(unsafe { socket(domain, ty | libc::SOCK_CLOEXEC, protocol) })
}

/// Creates a blocking, close-on-exec socket.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn sys_socket(domain: c_int, ty: c_int, protocol: c_int) -> io::Result<RawFd> {
    let fd = cvt(unsafe { socket(domain, ty, protocol) })?;

    if let Err(e) = sys_set_cloexec(fd).and_then(|()| sys_set_nosigpipe(fd)) {
        sys_close(fd);
        return Err(e);
    }

    Ok(fd)
}

/// Keeps writes to a reset peer from raising `SIGPIPE`.
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn sys_set_nosigpipe(fd: RawFd) -> io::Result<()> {
    sys_setsockopt_int(fd, SOL_SOCKET, libc::SO_NOSIGPIPE, 1)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
)))]
fn sys_set_nosigpipe(_fd: RawFd) -> io::Result<()> {
    Ok(())
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);

    cvt(unsafe { libc::bind(fd, &storage as *const _ as *const sockaddr, len) })?;
    Ok(())
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: RawFd, backlog: c_int) -> io::Result<()> {
    cvt(unsafe { listen(fd, backlog) })?;
    Ok(())
}

/// Accepts a new incoming connection.
///
/// The returned client socket is close-on-exec and explicitly put in
/// blocking mode, whatever mode the listening socket is in.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client_fd = accept_raw(fd, &mut storage, &mut len)?;

    if let Err(e) = sys_set_nonblocking(client_fd, false) {
        sys_close(client_fd);
        return Err(e);
    }

    match sockaddr_storage_to_socketaddr(&storage) {
        Ok(addr) => Ok((client_fd, addr)),
        Err(e) => {
            sys_close(client_fd);
            Err(e)
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn accept_raw(fd: RawFd, storage: &mut sockaddr_storage, len: &mut socklen_t) -> io::Result<RawFd> {
    cvt(unsafe {
        libc::accept4(
            fd,
            storage as *mut _ as *mut sockaddr,
            len,
            libc::SOCK_CLOEXEC,
        )
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn accept_raw(fd: RawFd, storage: &mut sockaddr_storage, len: &mut socklen_t) -> io::Result<RawFd> {
    let client_fd = cvt(unsafe { libc::accept(fd, storage as *mut _ as *mut sockaddr, len) })?;

    if let Err(e) = sys_set_cloexec(client_fd).and_then(|()| sys_set_nosigpipe(client_fd)) {
        sys_close(client_fd);
        return Err(e);
    }

    Ok(client_fd)
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    cvt(unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    sockaddr_storage_to_socketaddr(&storage)
}

/// Returns the remote address of a connected socket.
pub(crate) fn sys_peername(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    cvt(unsafe { getpeername(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    sockaddr_storage_to_socketaddr(&storage)
}

/// Initiates a connection.
///
/// On a non-blocking socket this usually fails with `EINPROGRESS`; the
/// outcome is then read back with [`sys_get_socket_error`].
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);

    cvt(unsafe { connect(fd, &storage as *const _ as *const sockaddr, len) })?;
    Ok(())
}

/// Reads and clears the pending error of a socket (`SO_ERROR`).
pub(crate) fn sys_get_socket_error(fd: RawFd) -> io::Result<()> {
    let mut value: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    cvt(unsafe {
        getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut value as *mut _ as *mut c_void,
            &mut len,
        )
    })?;

    if value == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(value))
    }
}

/// Receives at most `buffer.len()` bytes.
///
/// With `dontwait` the call never blocks, whatever the descriptor's mode.
pub(crate) fn sys_recv(fd: RawFd, buffer: &mut [u8], dontwait: bool) -> io::Result<usize> {
    let flags = if dontwait { libc::MSG_DONTWAIT } else { 0 };
    let n = unsafe { recv(fd, buffer.as_mut_ptr() as *mut c_void, buffer.len(), flags) };

    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Sends as much of `buffer` as the kernel accepts in one call.
///
/// With `dontwait` the call never blocks, whatever the descriptor's mode.
pub(crate) fn sys_send(fd: RawFd, buffer: &[u8], dontwait: bool) -> io::Result<usize> {
    let flags = if dontwait {
        SEND_FLAGS | libc::MSG_DONTWAIT
    } else {
        SEND_FLAGS
    };
    let n = unsafe { send(fd, buffer.as_ptr() as *const c_void, buffer.len(), flags) };

    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Shuts down a socket.
pub(crate) fn sys_shutdown(fd: RawFd, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => SHUT_RD,
        Shutdown::Write => SHUT_WR,
        Shutdown::Both => SHUT_RDWR,
    };

    cvt(unsafe { shutdown(fd, how) })?;
    Ok(())
}

fn sys_setsockopt_int(fd: RawFd, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
    cvt(unsafe {
        setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    })?;
    Ok(())
}

/// Toggles `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd, enabled: bool) -> io::Result<()> {
    sys_setsockopt_int(fd, SOL_SOCKET, SO_REUSEADDR, enabled as c_int)
}

/// Toggles `TCP_NODELAY` on a socket.
pub(crate) fn sys_set_nodelay(fd: RawFd, enabled: bool) -> io::Result<()> {
    sys_setsockopt_int(fd, IPPROTO_TCP, TCP_NODELAY, enabled as c_int)
}

/// Sets the `IPV6_V6ONLY` socket option.
pub(crate) fn sys_set_v6only(fd: RawFd, v6only: bool) -> io::Result<()> {
    sys_setsockopt_int(fd, IPPROTO_IPV6, IPV6_V6ONLY, v6only as c_int)
}

/// Converts a `sockaddr_storage` to a Rust `SocketAddr`.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A connected pair of blocking stream sockets.
    fn socket_pair() -> (RawFd, RawFd) {
        let mut fds = [0 as c_int; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "socketpair failed: {}", io::Error::last_os_error());
        (fds[0], fds[1])
    }

    #[test]
    fn dontwait_calls_never_block_a_blocking_socket() {
        let (left, right) = socket_pair();
        let mut buffer = [0u8; 8];

        let err = sys_recv(left, &mut buffer, true).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        assert_eq!(sys_send(right, b"abc", true).unwrap(), 3);
        assert_eq!(sys_recv(left, &mut buffer, true).unwrap(), 3);
        assert_eq!(&buffer[..3], b"abc");

        sys_close(left);
        sys_close(right);
    }
}

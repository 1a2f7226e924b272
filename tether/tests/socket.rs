use tether::{ConnectionError, Error};
use tether::net::{AddressFamily, ProtocolType, Socket, SockType, TcpSocket};

use std::time::Duration;

fn create_socket<F>(family: AddressFamily, sock_type: SockType, protocol: ProtocolType, check: F)
where
    F: FnOnce(Socket),
{
    let socket = Socket::new(family, sock_type, protocol).expect("Failed to create socket");
    check(socket);
}

#[test]
fn test_create_reports_parameters() {
    create_socket(AddressFamily::Inet, SockType::Stream, ProtocolType::Tcp, |socket| {
        assert_eq!(socket.address_family(), AddressFamily::Inet);
        assert_eq!(socket.sock_type(), SockType::Stream);
        assert_eq!(socket.protocol_type(), ProtocolType::Tcp);
    });

    create_socket(AddressFamily::Inet6, SockType::Stream, ProtocolType::Tcp, |socket| {
        assert_eq!(socket.address_family(), AddressFamily::Inet6);
        assert_eq!(socket.sock_type(), SockType::Stream);
        assert_eq!(socket.protocol_type(), ProtocolType::Tcp);
    });

    create_socket(AddressFamily::Inet6, SockType::Datagram, ProtocolType::Udp, |socket| {
        assert_eq!(socket.address_family(), AddressFamily::Inet6);
        assert_eq!(socket.sock_type(), SockType::Datagram);
        assert_eq!(socket.protocol_type(), ProtocolType::Udp);
    });
}

#[test]
fn test_inconsistent_parameters_are_rejected() {
    let err = Socket::new(AddressFamily::Inet, SockType::Stream, ProtocolType::Udp).unwrap_err();
    assert!(
        matches!(
            err,
            Error::InvalidParameters {
                sock_type: SockType::Stream,
                protocol: ProtocolType::Udp,
                ..
            }
        ),
        "unexpected error: {err}"
    );

    let err =
        Socket::new(AddressFamily::Inet6, SockType::Datagram, ProtocolType::Tcp).unwrap_err();
    assert!(matches!(err, Error::InvalidParameters { .. }));
}

#[test]
fn test_set_blocking() {
    create_socket(AddressFamily::Inet, SockType::Stream, ProtocolType::Tcp, |mut socket| {
        assert!(socket.is_blocking(), "default mode is blocking");

        socket.set_blocking(false).unwrap();
        assert!(!socket.is_blocking(), "socket is non-blocking mode");

        socket.set_blocking(true).unwrap();
        assert!(socket.is_blocking(), "socket is blocking mode");

        socket.set_blocking(true).unwrap();
        assert!(socket.is_blocking(), "repeating a mode keeps it");
    });
}

#[test]
fn test_close_is_idempotent() {
    create_socket(AddressFamily::Inet, SockType::Stream, ProtocolType::Tcp, |mut socket| {
        assert!(!socket.is_closed());
        assert!(socket.raw_fd().is_ok());

        socket.close();
        assert!(socket.is_closed());

        socket.close();
        assert!(socket.is_closed());
    });
}

#[test]
fn test_operations_after_close_fail_with_closed() {
    create_socket(AddressFamily::Inet, SockType::Stream, ProtocolType::Tcp, |mut socket| {
        socket.close();

        assert!(socket.set_blocking(false).unwrap_err().is_closed());
        assert!(socket.raw_fd().unwrap_err().is_closed());
        assert!(socket.is_blocking(), "failed toggle must not change the mode");
    });

    let mut socket = TcpSocket::new().unwrap();
    socket.close();

    let err = socket
        .connect("127.0.0.1", 1, Some(Duration::from_millis(100)))
        .unwrap_err();
    assert!(err.is_closed());
    assert!(socket.bind("127.0.0.1", 0).unwrap_err().is_closed());
    assert!(socket.listen(None).unwrap_err().is_closed());
    assert!(socket.accept().unwrap_err().is_closed());
    assert!(socket.recv(16, None).unwrap_err().is_closed());
    assert!(socket.send(b"hello", None).unwrap_err().is_closed());
    assert!(socket.local_addr().unwrap_err().is_closed());
    assert!(socket.set_nodelay(true).unwrap_err().is_closed());
}

#[test]
fn test_bind_reports_os_error() {
    let mut first = TcpSocket::new().unwrap();
    first.bind("127.0.0.1", 0).unwrap();
    first.listen(None).unwrap();
    let port = first.local_addr().unwrap().port();

    let mut second = TcpSocket::new().unwrap();
    let err = second.bind("127.0.0.1", port).unwrap_err();

    assert!(matches!(err, Error::System(_)), "unexpected error: {err}");
    assert_eq!(err.raw_os_error(), Some(libc::EADDRINUSE));
}

#[test]
fn test_bind_unresolvable_host() {
    let mut socket = TcpSocket::new().unwrap();
    let err = socket.bind("::1", 0).unwrap_err();
    assert!(
        matches!(err, Error::Connection(ConnectionError::Unresolved { port: 0, .. })),
        "IPv4 socket cannot bind an IPv6 host: {err}"
    );
}

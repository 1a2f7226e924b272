use std::os::fd::RawFd;

/// Readiness a caller waits for on a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const READABLE: Interest = Interest {
        read: true,
        write: false,
    };

    pub(crate) const WRITABLE: Interest = Interest {
        read: false,
        write: true,
    };
}

/// Cross-thread wake-up channel.
///
/// On Linux both ends are the same `eventfd`; elsewhere they are the two
/// ends of a non-blocking pipe. Polling the read end alongside another
/// descriptor lets a second thread interrupt a blocked wait without closing
/// the descriptor being waited on.
#[derive(Debug)]
pub(crate) struct Waker {
    pub(crate) read: RawFd,
    pub(crate) write: RawFd,
}

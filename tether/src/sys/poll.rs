//! `poll(2)`-based readiness waits.
//!
//! Every deadline-bounded operation in the crate funnels through
//! [`wait_ready`]: the socket call itself is only issued once the
//! descriptor is known to be ready, so timeouts behave the same on every
//! Unix target regardless of `SO_RCVTIMEO`/`SO_SNDTIMEO` support.

use super::common::{Interest, Waker};
use super::unix::sys_close;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, c_int, nfds_t, pollfd};
use std::io;
use std::os::fd::RawFd;
use std::time::Instant;

impl Waker {
    /// Creates the wake-up channel.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(crate) fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { read: fd, write: fd })
    }

    /// Creates the wake-up channel.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub(crate) fn new() -> io::Result<Self> {
        use super::unix::{sys_set_cloexec, sys_set_nonblocking};

        let mut fds = [0 as c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let waker = Self {
            read: fds[0],
            write: fds[1],
        };

        for fd in fds {
            sys_set_nonblocking(fd, true)?;
            sys_set_cloexec(fd)?;
        }

        Ok(waker)
    }

    /// Signals the channel.
    ///
    /// The signal is level-triggered: it stays pending until drained, so a
    /// wake issued before the other thread starts waiting is not lost.
    pub(crate) fn wake(&self) -> io::Result<()> {
        let buf: u64 = 1;
        let len = if self.read == self.write {
            8
        } else {
            1
        };

        let n = unsafe { libc::write(self.write, &buf as *const _ as *const _, len) };
        if n < 0 {
            let err = io::Error::last_os_error();
            // A full counter or pipe already carries a pending signal.
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }

        Ok(())
    }

    /// Consumes any pending signal.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        while unsafe { libc::read(self.read, buf.as_mut_ptr() as *mut _, buf.len()) } > 0 {}
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        sys_close(self.read);
        if self.write != self.read {
            sys_close(self.write);
        }
    }
}

/// Waits until `fd` is ready for `interest` or `deadline` passes.
///
/// Returns `Ok(false)` on timeout. `None` waits indefinitely. Error and
/// hang-up conditions count as ready so the following syscall reports them.
pub(crate) fn wait_ready(
    fd: RawFd,
    interest: Interest,
    deadline: Option<Instant>,
) -> io::Result<bool> {
    let mut fds = [pollfd {
        fd,
        events: events_for(interest),
        revents: 0,
    }];

    poll_until(&mut fds, deadline)
}

/// Waits until `fd` is ready or the waker is signalled.
///
/// Returns `Ok(true)` when `fd` is ready and `Ok(false)` when woken.
pub(crate) fn wait_or_wake(fd: RawFd, interest: Interest, waker: &Waker) -> io::Result<bool> {
    let mut fds = [
        pollfd {
            fd,
            events: events_for(interest),
            revents: 0,
        },
        pollfd {
            fd: waker.read,
            events: POLLIN,
            revents: 0,
        },
    ];

    poll_until(&mut fds, None)?;

    Ok(fds[0].revents != 0)
}

fn events_for(interest: Interest) -> i16 {
    let mut events = 0;

    if interest.read {
        events |= POLLIN;
    }
    if interest.write {
        events |= POLLOUT;
    }

    events
}

/// Polls `fds` until one becomes ready or `deadline` passes.
///
/// `EINTR` restarts the wait with the remaining time.
fn poll_until(fds: &mut [pollfd], deadline: Option<Instant>) -> io::Result<bool> {
    loop {
        let timeout = timeout_ms(deadline);

        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as nfds_t, timeout) };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        if rc == 0 {
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return Ok(false),
                _ => continue,
            }
        }

        if fds.iter().any(|p| p.revents & POLLNVAL != 0) {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        debug_assert!(fds.iter().any(|p| p.revents & (POLLIN | POLLOUT | POLLERR | POLLHUP) != 0));
        return Ok(true);
    }
}

/// Milliseconds left until `deadline`, rounded up, `-1` when unbounded.
fn timeout_ms(deadline: Option<Instant>) -> c_int {
    let Some(deadline) = deadline else {
        return -1;
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    let mut ms = remaining.as_millis();
    if remaining.as_nanos() % 1_000_000 != 0 {
        ms += 1;
    }

    ms.min(c_int::MAX as u128) as c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeout_rounds_up_to_the_next_millisecond() {
        let deadline = Instant::now() + Duration::from_micros(1500);
        let ms = timeout_ms(Some(deadline));
        assert!((1..=2).contains(&ms), "got {ms}");
    }

    #[test]
    fn unbounded_timeout_is_negative() {
        assert_eq!(timeout_ms(None), -1);
    }

    #[test]
    fn expired_deadline_polls_without_waiting() {
        assert_eq!(timeout_ms(Some(Instant::now() - Duration::from_secs(1))), 0);
    }

    #[test]
    fn waker_interrupts_a_wait() {
        let waker = Waker::new().unwrap();
        let idle = Waker::new().unwrap();

        waker.wake().unwrap();
        let ready = wait_or_wake(idle.read, Interest::READABLE, &waker).unwrap();
        assert!(!ready);

        waker.drain();
        let ready = wait_ready(waker.read, Interest::READABLE, Some(Instant::now())).unwrap();
        assert!(!ready, "drained waker must not stay readable");
    }
}

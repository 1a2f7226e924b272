//! Platform layer.
//!
//! Thin wrappers over the `libc` socket calls plus the readiness waits the
//! public types build their deadlines on. Nothing here tracks ownership:
//! callers hold the descriptors and decide when to close them.

pub(crate) mod common;
mod poll;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;

pub(crate) use common::{Interest, Waker};
pub(crate) use poll::{wait_or_wake, wait_ready};

use crate::error::Error;

use std::time::{Duration, Instant};

/// Wall-clock budget of a single blocking call.
///
/// A deadline is fixed when the call starts, so every internal retry of
/// that call (partial writes, interrupted waits, spurious wake-ups) draws
/// from the same budget.
///
/// `None` and a zero duration both mean "no explicit bound".
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use tether::time::Deadline;
///
/// let deadline = Deadline::after(Some(Duration::from_secs(1)));
/// assert!(deadline.is_bounded());
///
/// let unbounded = Deadline::after(Some(Duration::ZERO));
/// assert!(!unbounded.is_bounded());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    budget: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Deadline {
    /// Starts a deadline that expires `timeout` from now.
    pub fn after(timeout: Option<Duration>) -> Self {
        match timeout.filter(|t| !t.is_zero()) {
            Some(budget) => Self {
                budget: Some(budget),
                expires_at: Instant::now().checked_add(budget),
            },
            None => Self::never(),
        }
    }

    /// A deadline that never expires.
    pub fn never() -> Self {
        Self {
            budget: None,
            expires_at: None,
        }
    }

    /// Returns `true` if this deadline carries an explicit bound.
    pub fn is_bounded(&self) -> bool {
        self.budget.is_some()
    }

    /// The total budget the deadline was started with.
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Time left before expiry, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` once the deadline has passed.
    pub fn has_elapsed(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    pub(crate) fn instant(&self) -> Option<Instant> {
        self.expires_at
    }

    pub(crate) fn elapsed_error(&self) -> Error {
        Error::Timeout(self.budget.unwrap_or_default())
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_unbounded() {
        let deadline = Deadline::after(Some(Duration::ZERO));
        assert!(!deadline.is_bounded());
        assert_eq!(deadline.remaining(), None);
        assert!(!deadline.has_elapsed());
    }

    #[test]
    fn remaining_shrinks_and_elapses() {
        let deadline = Deadline::after(Some(Duration::from_millis(20)));
        assert!(deadline.remaining().unwrap() <= Duration::from_millis(20));

        std::thread::sleep(Duration::from_millis(30));
        assert!(deadline.has_elapsed());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn elapsed_error_reports_the_budget() {
        let deadline = Deadline::after(Some(Duration::from_millis(250)));
        match deadline.elapsed_error() {
            Error::Timeout(budget) => assert_eq!(budget, Duration::from_millis(250)),
            other => panic!("unexpected error: {other}"),
        }
    }
}

//! Exponential backoff utility (C9).
//!
//! Initial delay doubling on failure up to a cap, halved on success —
//! the same shape as the teacher's `utils::retry::retry_with_backoff`,
//! pulled out into reusable state since every dispatcher variant needs
//! its own independent backoff clock rather than a one-shot retry loop.

use std::time::Duration;

/// Tracks a read-failure backoff clock for one dispatcher.
///
/// `next()` returns the delay to wait before retrying and doubles the
/// internal state (capped at `max`); `reset()` (called on a successful
/// read) sets the delay back to `initial`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial }
    }

    /// Delay to use for the next retry, then double the clock for the one
    /// after that (capped at `max`).
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Reset to the initial delay after a successful operation.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap_then_resets() {
        let mut b = Backoff::new(Duration::from_millis(1000), Duration::from_millis(60_000));
        assert_eq!(b.next(), Duration::from_millis(1000));
        assert_eq!(b.next(), Duration::from_millis(2000));
        assert_eq!(b.next(), Duration::from_millis(4000));

        b.reset();
        assert_eq!(b.next(), Duration::from_millis(1000));
    }

    #[test]
    fn caps_at_max() {
        let mut b = Backoff::new(Duration::from_millis(40_000), Duration::from_millis(60_000));
        assert_eq!(b.next(), Duration::from_millis(40_000));
        assert_eq!(b.next(), Duration::from_millis(60_000));
        assert_eq!(b.next(), Duration::from_millis(60_000));
    }
}

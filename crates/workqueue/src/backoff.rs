//! # Fibonacci Backoff
//!
//! Progressive backoff that grows more slowly than exponential backoff.
//! Useful for handlers that talk to slow external systems, where doubling the
//! delay on every failure would push retries out too far too quickly.
//!
//! Sequence for a base of `b`: b, b, 2b, 3b, 5b, 8b, ... capped at the maximum.

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, starting with two copies of the
/// base delay and never exceeding the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibonacciBackoff {
    base: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with the given base and cap.
    ///
    /// A base larger than the cap is clamped to the cap.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base: base.min(max),
            max,
        }
    }

    /// Delay after `failures` earlier failures of the same key
    ///
    /// `failures` is 0-indexed: 0 and 1 both map to `base`, then the sequence
    /// continues 2b, 3b, 5b, ... and stops growing once it reaches `max`.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures <= 1 {
            return self.base;
        }

        let mut prev = self.base;
        let mut current = self.base;
        for _ in 2..=failures {
            let next = prev.saturating_add(current);
            prev = current;
            current = next.min(self.max);
            if current >= self.max {
                break;
            }
        }

        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let backoff = FibonacciBackoff::new(SECOND, 10 * SECOND);
        let delays: Vec<Duration> = (0..8).map(|failures| backoff.delay_for(failures)).collect();

        assert_eq!(
            delays,
            vec![
                SECOND,
                SECOND,
                2 * SECOND,
                3 * SECOND,
                5 * SECOND,
                8 * SECOND,
                10 * SECOND, // capped, would be 13s
                10 * SECOND,
            ]
        );
    }

    #[test]
    fn test_large_failure_count_stays_capped() {
        let backoff = FibonacciBackoff::new(SECOND, 10 * SECOND);
        assert_eq!(backoff.delay_for(u32::MAX), 10 * SECOND);
    }

    #[test]
    fn test_base_clamped_to_max() {
        let backoff = FibonacciBackoff::new(20 * SECOND, 10 * SECOND);
        assert_eq!(backoff.delay_for(0), 10 * SECOND);
        assert_eq!(backoff.delay_for(5), 10 * SECOND);
    }
}

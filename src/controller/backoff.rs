//! # Exponential Backoff
//!
//! Per-resource retry delays for failed reconciliations.
//! Sequence with the defaults: 5s, 10s, 20s, 40s, 80s, 160s, 300s (max).
//!
//! ## Usage
//!
//! ```rust
//! use catalogd::controller::backoff::ExponentialBackoff;
//!
//! let mut backoff = ExponentialBackoff::new(5, 300);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 10);
//! assert_eq!(backoff.next_backoff_seconds(), 20);
//! ```

use std::time::Duration;

/// Doubling backoff calculator, capped at a maximum
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First delay, also the value restored on reset
    base_seconds: u64,
    /// Delay returned by the next call
    current_seconds: u64,
    max_seconds: u64,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `base_seconds` and capped at `max_seconds`
    #[must_use]
    pub fn new(base_seconds: u64, max_seconds: u64) -> Self {
        Self {
            base_seconds,
            current_seconds: base_seconds.min(max_seconds),
            max_seconds,
        }
    }

    /// Get the next delay in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        self.current_seconds = self
            .current_seconds
            .saturating_mul(2)
            .min(self.max_seconds);
        result
    }

    /// Get the next delay as a `Duration` and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Restart the sequence after a successful reconciliation
    pub fn reset(&mut self) {
        self.current_seconds = self.base_seconds.min(self.max_seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(5, 300);

        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 10);
        assert_eq!(backoff.next_backoff_seconds(), 20);
        assert_eq!(backoff.next_backoff_seconds(), 40);
        assert_eq!(backoff.next_backoff_seconds(), 80);
        assert_eq!(backoff.next_backoff_seconds(), 160);
        assert_eq!(backoff.next_backoff_seconds(), 300); // capped
        assert_eq!(backoff.next_backoff_seconds(), 300);
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(5, 300);
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();

        backoff.reset();

        assert_eq!(backoff.next_backoff_seconds(), 5);
        assert_eq!(backoff.next_backoff_seconds(), 10);
    }

    #[test]
    fn test_exponential_backoff_as_duration() {
        let mut backoff = ExponentialBackoff::new(5, 300);
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
    }

    #[test]
    fn test_base_above_max_is_capped() {
        let mut backoff = ExponentialBackoff::new(600, 300);
        assert_eq!(backoff.next_backoff_seconds(), 300);
        assert_eq!(backoff.next_backoff_seconds(), 300);
    }

    #[test]
    fn test_exponential_backoff_per_resource_state() {
        let mut backoff1 = ExponentialBackoff::new(5, 300);
        let mut backoff2 = ExponentialBackoff::new(5, 300);

        assert_eq!(backoff1.next_backoff_seconds(), 5);
        assert_eq!(backoff1.next_backoff_seconds(), 10);
        assert_eq!(backoff1.next_backoff_seconds(), 20);

        // Independent sequence
        assert_eq!(backoff2.next_backoff_seconds(), 5);

        backoff1.reset();
        assert_eq!(backoff1.next_backoff_seconds(), 5);
        assert_eq!(backoff2.next_backoff_seconds(), 10);
    }
}

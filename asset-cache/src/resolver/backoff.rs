//! Capped exponential backoff for resolution retries.

use std::time::Duration;

// =============================================================================
// Backoff Constants
// =============================================================================

/// Default number of resolution attempts (including the first).
pub const DEFAULT_RESOLVE_ATTEMPTS: u32 = 5;

/// Default delay after the first failed attempt (200ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 200;

/// Default maximum delay between attempts (5 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 5;

/// Default multiplier applied after each failure.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Retry schedule for address resolution.
///
/// The delay doubles (by default) after each failed attempt and never exceeds
/// `max_delay`. After `max_attempts` attempts the failure is terminal.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (including the initial attempt).
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure.
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVE_ATTEMPTS)
    }
}

impl BackoffPolicy {
    /// Creates a policy with default delays and the given attempt ceiling.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Set the delay after the first failure.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Returns the maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Calculates the delay to wait after failed attempt `attempt` (1-based).
    ///
    /// Returns `None` when no further attempt is allowed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        // initial_delay * multiplier^(attempt-1), capped
        let factor = self.multiplier.powi((attempt - 1) as i32);
        let delay_ms = self.initial_delay.as_millis() as f64 * factor;
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts(), DEFAULT_RESOLVE_ATTEMPTS);
        assert_eq!(
            policy.delay_for_attempt(1),
            Some(Duration::from_millis(DEFAULT_INITIAL_DELAY_MS))
        );
    }

    #[test]
    fn test_delays_double() {
        let policy = BackoffPolicy::new(4).with_initial_delay(Duration::from_millis(100));

        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_attempt(4), None); // ceiling reached
    }

    #[test]
    fn test_delays_are_capped() {
        let policy = BackoffPolicy::new(20)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(policy.delay_for_attempt(10), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = BackoffPolicy::new(1);
        assert_eq!(policy.delay_for_attempt(1), None);
    }

    #[test]
    fn test_custom_multiplier() {
        let policy = BackoffPolicy::new(5)
            .with_initial_delay(Duration::from_millis(10))
            .with_multiplier(3.0);
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(90)));
    }
}

//! Exponential backoff for unattended reconnection.
//!
//! The delay doubles with every attempt and is capped:
//! ```text
//! delay[n] = min(2^n, 60) seconds, n counted from 1
//! ```
//!
//! - Attempt 1: 2s
//! - Attempt 2: 4s
//! - Attempt 5: 32s
//! - Attempt 6+: 60s (capped)
//!
//! After `max_attempts` attempts (10 by default) the schedule is exhausted.
//!
//! # Examples
//!
//! ```ignore
//! use mqttchat_session::Backoff;
//!
//! let mut backoff = Backoff::default();
//! let delay = backoff.next_sleep().unwrap();
//! assert_eq!(delay.as_secs(), 2);
//! assert_eq!(backoff.attempt(), 1);
//!
//! backoff.reset();
//! assert_eq!(backoff.attempt(), 0);
//! ```

use std::time::Duration;

use thiserror::Error;

/// Ceiling on reconnection attempts before the session gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Upper bound of a single backoff wait.
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(60);

/// Returned by [`Backoff::next_sleep`] once the ceiling is reached.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackoffError {
    /// The attempt counter reached the configured ceiling.
    #[error("Maximum number of attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

/// Attempt counter plus the doubling delay schedule.
///
/// The counter is the `ReconnectionAttemptCounter` of the session: it is reset
/// on a successful CONNACK and on user disconnect, and incremented once per
/// attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Base of the exponent (2 seconds for the first attempt).
    base: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Attempts made in the current sequence (0 before the first).
    attempt: u32,

    /// Hard limit on attempts.
    max_attempts: u32,
}

impl Backoff {
    /// Creates a schedule with a custom base, cap and ceiling.
    ///
    /// The delay for attempt `n` is `min(base * 2^n, max)`.
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            attempt: 0,
            max_attempts,
        }
    }

    /// Delay for a given 1-based attempt number, without touching the counter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.min(31);
        self.base
            .checked_mul(1_u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Returns true once no further attempt may be made.
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Counts a new attempt and returns how long to wait before it.
    ///
    /// # Returns
    /// - `Ok(Duration)`: the wait before the attempt
    /// - `Err(BackoffError)`: the ceiling was already reached, the counter is unchanged
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        if self.is_exhausted() {
            return Err(BackoffError::MaxAttemptLimitError(self.max_attempts));
        }
        self.attempt += 1;
        Ok(self.delay_for(self.attempt))
    }

    /// Counts a new attempt that runs without waiting (network came back).
    pub fn next_immediate(&mut self) -> Result<(), BackoffError> {
        self.next_sleep().map(|_| ())
    }

    /// Resets the counter after a successful connect or a user disconnect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Current attempt count.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Configured ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Configured cap.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for Backoff {
    /// `min(2^n, 60)` seconds with a ceiling of 10 attempts.
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            MAX_BACKOFF_DELAY,
            MAX_RECONNECT_ATTEMPTS,
        )
    }
}

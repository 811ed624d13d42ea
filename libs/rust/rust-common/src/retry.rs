//! Exponential backoff between attempts of a failing call.
//!
//! The policy only computes delays and budgets; callers own the loop so they
//! can race the sleep against shutdown.

use std::time::Duration;

/// Past this exponent the delay is already pinned to `max_delay`.
const MAX_EXPONENT: u32 = 30;

/// Upper bound of the random stretch added to a delay.
const JITTER_RATIO: f64 = 0.25;

/// Backoff settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts allowed after the first failure, `None` for no limit
    pub max_retries: Option<u32>,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Ceiling for the un-jittered delay
    pub max_delay: Duration,
    /// Growth factor per failed attempt
    pub multiplier: f64,
    /// Stretch each delay by a random amount
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Give up after `max_retries` failed attempts.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Never give up.
    #[must_use]
    pub const fn with_unlimited_retries(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Delay after the first failure.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Ceiling for the un-jittered delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Deterministic delays, mostly useful in tests.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Backoff schedule derived from a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Policy following `config`.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay to wait after the `attempt`-th failure (zero based).
    ///
    /// Grows geometrically up to `max_delay`. Jitter only ever lengthens the
    /// delay, by at most a quarter.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let RetryConfig {
            initial_delay,
            max_delay,
            multiplier,
            jitter,
            ..
        } = self.config;

        let grown = initial_delay.as_millis() as f64 * multiplier.powi(attempt.min(MAX_EXPONENT) as i32);
        let capped = grown.min(max_delay.as_millis() as f64);
        let stretched = if jitter {
            capped * rand::random::<f64>().mul_add(JITTER_RATIO, 1.0)
        } else {
            capped
        };

        Duration::from_millis(stretched as u64)
    }

    /// Whether the budget allows another try after `attempt` failures.
    #[must_use]
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        self.config.max_retries.is_none_or(|max| attempt < max)
    }

    /// Configured budget, `None` when unlimited.
    #[must_use]
    pub const fn max_retries(&self) -> Option<u32> {
        self.config.max_retries
    }
}

//! Retry policy with exponential backoff.

use std::time::Duration;

/// How often and how patiently a step is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    pub base: f64,

    /// Spread delays by ±20% so simultaneous chains do not retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Doubling delays starting at `initial_delay`, capped at `max_delay`.
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.base.powi(exponent);
        let capped = nanos.min(self.max_delay.as_nanos() as f64);

        let nanos = if self.jitter {
            capped * (0.8 + 0.4 * rand::random::<f64>())
        } else {
            capped
        };
        Duration::from_nanos(nanos as u64)
    }
}

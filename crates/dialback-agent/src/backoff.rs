//! Exponential backoff for reconnection

use std::time::Duration;

/// Backoff starting interval
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff ceiling
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Jitter applied to each delay: ±25%
const DEFAULT_JITTER: f64 = 0.25;

/// Exponential backoff with jitter for reconnection attempts
pub struct ExponentialBackoff {
    /// Delay the next failure will pay (before jitter)
    current: Duration,
    /// Value `current` resets to after a successful connect
    initial: Duration,
    /// Maximum delay
    max: Duration,
    /// Jitter fraction (0.0 to 1.0); the delay is scaled by a random
    /// factor in `[1 - jitter, 1 + jitter]`
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a backoff with custom parameters
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            current: initial,
            initial,
            max,
            jitter,
        }
    }

    /// The standard reconnect policy: 1 s doubling to 60 s, ±25% jitter
    pub fn standard() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF, DEFAULT_JITTER)
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;

        let doubled = base.saturating_mul(2);
        self.current = std::cmp::min(doubled, self.max);

        let factor = 1.0 + self.jitter * (2.0 * rand::random::<f64>() - 1.0);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }

    /// Reset to the initial delay after a successful connection
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

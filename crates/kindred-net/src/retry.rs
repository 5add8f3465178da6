use std::time::Duration;

/// Opt-in retry schedule for establishing a broker session.
///
/// Only the initial connect is retried. A session that drops after being
/// established is reported through the connection listeners and stays down
/// until the caller connects again.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. `1` disables retrying.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Exponential backoff doubling from `initial_backoff`, capped at 30s.
    pub fn exponential(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based), or
    /// `None` once the attempts are used up.
    pub fn backoff_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        if self.initial_backoff.is_zero() {
            return Some(Duration::ZERO);
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        // Large attempt counts overflow Duration; anything that big is capped.
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff);
        Some(delay.min(self.max_backoff))
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

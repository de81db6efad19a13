use std::time::Duration;

/// Exponential, capped reconnect delay
///
/// Each call to [`next_delay`](Backoff::next_delay) returns
/// `initial * factor^attempt`, never more than `max`. [`reset`](Backoff::reset)
/// starts over once the connection has proven healthy.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: u32,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            factor: 2,
            attempt: 0,
        }
    }

    /// Set the growth factor (builder pattern)
    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor.max(1);
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        let multiplier = self.factor.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.initial.saturating_mul(multiplier).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive delays handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

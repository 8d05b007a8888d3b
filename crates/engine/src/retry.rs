use std::time::Duration;

/// Exponential backoff schedule for chunk retry attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt `attempt` (1-based).
    ///
    /// Exponential up to the cap, then scattered by ±25% so chunks
    /// retrying in parallel do not hammer the server in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let steps = attempt.saturating_sub(1).min(63);
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(steps as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        // Scale by a factor in [0.75, 1.25) taken from the clock's
        // nanosecond remainder.
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let spread = 0.75 + f64::from(nanos % 1_000_000) / 2_000_000.0;
        Duration::from_secs_f64((capped * spread).max(0.05))
    }
}

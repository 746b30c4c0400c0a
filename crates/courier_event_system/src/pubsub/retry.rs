use std::time::Duration;

/// Capped linear backoff: `min(attempt × step, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub step: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(step: Duration, max: Duration) -> Self {
        Self { step, max }
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(2000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_linearly_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(50));
        assert_eq!(policy.delay(10), Duration::from_millis(500));
        assert_eq!(policy.delay(40), Duration::from_millis(2000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(2000));
    }
}

use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff for transient provider errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4, base_delay_ms: 200, multiplier: 2 }
    }
}

impl RetryPolicy {
    pub fn from_provider_settings(max_retries: u32, base_delay_ms: u64, multiplier: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1).max(1),
            base_delay_ms: base_delay_ms.max(1),
            multiplier: multiplier.max(1),
        }
    }

    /// Delay before the given retry (1-based), capped at 30s before jitter.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let scaled = self
            .base_delay_ms
            .saturating_mul(u64::from(self.multiplier).saturating_pow(exponent));
        let capped = scaled.min(30_000);

        // Up to 25% jitter keeps throttled branches from retrying in lockstep.
        let jitter = rand::thread_rng().gen_range(0..=capped / 4);
        Duration::from_millis(capped + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::RetryPolicy;

    #[test]
    fn delays_grow_exponentially_and_stay_bounded() {
        let policy = RetryPolicy { max_attempts: 5, base_delay_ms: 100, multiplier: 2 };

        let first = policy.delay_for_retry(1).as_millis() as u64;
        let second = policy.delay_for_retry(2).as_millis() as u64;
        let third = policy.delay_for_retry(3).as_millis() as u64;

        assert!((100..=125).contains(&first));
        assert!((200..=250).contains(&second));
        assert!((400..=500).contains(&third));

        let huge = policy.delay_for_retry(40).as_millis() as u64;
        assert!(huge <= 37_500, "cap plus jitter bound, got {huge}");
    }

    #[test]
    fn from_provider_settings_counts_the_initial_attempt() {
        let policy = RetryPolicy::from_provider_settings(3, 200, 2);
        assert_eq!(policy.max_attempts, 4);

        let degenerate = RetryPolicy::from_provider_settings(0, 0, 0);
        assert_eq!(degenerate.max_attempts, 1);
        assert_eq!(degenerate.base_delay_ms, 1);
        assert_eq!(degenerate.multiplier, 1);
    }
}

//! Exponential backoff for per-artifact download attempts.

use std::time::Duration;

use {mirage_config::DownloadConfig, rand::Rng};

/// Bounded retry budget for one artifact.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first, at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each one after.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 50% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for RetryPolicy {
    fn from(cfg: &DownloadConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let multiplier = 2u32.saturating_pow(exp);
        let capped = self
            .base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay);

        if self.jitter && !capped.is_zero() {
            let factor = 1.0 + rand::rng().random_range(0.0..0.5);
            capped.mul_f64(factor)
        } else {
            capped
        }
    }
}

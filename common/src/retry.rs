// Retry strategy implementation with exponential backoff and optional jitter

use crate::config::PoolRetryConfig;
use rand::Rng;
use std::time::Duration;

/// Retry strategy trait for calculating retry delays
pub trait RetryStrategy: Send + Sync {
    /// Delay to wait after the `failures`-th consecutive failure.
    /// Returns None once the retry bound has been reached.
    fn next_delay(&self, failures: u32) -> Option<Duration>;

    /// Get the maximum number of failed attempts
    fn max_retries(&self) -> u32;

    /// Check if another attempt is allowed after `failures` failures
    fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_retries()
    }
}

/// Exponential backoff retry strategy
/// Sequence: base, 2×base, 4×base, ... capped at max_delay
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0, default: 0.0)
    jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from(&PoolRetryConfig::default())
    }
}

impl ExponentialBackoff {
    /// Create a new exponential backoff strategy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new exponential backoff strategy with custom values
    pub fn with_config(
        max_retries: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_factor: f64,
    ) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Exponential delay without jitter for the given failure count (1-based)
    pub fn base_delay_ms(&self, failures: u32) -> u64 {
        let exponent = failures.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Add random jitter to spread out reconnect storms; the result stays under the cap
    fn add_jitter_ms(&self, base_delay_ms: u64) -> u64 {
        if self.jitter_factor == 0.0 {
            return base_delay_ms;
        }

        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;
        let jitter_ms = if jitter_range_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_range_ms)
        } else {
            0
        };

        base_delay_ms
            .saturating_add(jitter_ms)
            .min(self.max_delay_ms)
    }
}

impl From<&PoolRetryConfig> for ExponentialBackoff {
    fn from(config: &PoolRetryConfig) -> Self {
        Self::with_config(
            config.max_retries,
            config.base_delay_ms,
            config.max_delay_ms,
            config.jitter_factor,
        )
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, failures: u32) -> Option<Duration> {
        if !self.should_retry(failures) {
            return None;
        }

        let base = self.base_delay_ms(failures);
        Some(Duration::from_millis(self.add_jitter_ms(base)))
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

//! Connection retry policy with exponential backoff.

use proxbridge_common::config::PoolConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(pool: &PoolConfig) -> Self {
        Self {
            max_attempts: pool.max_connect_attempts,
            initial_delay_ms: pool.initial_backoff_ms,
            max_delay_ms: pool.max_backoff_ms,
            backoff_multiplier: pool.backoff_multiplier,
        }
    }

    /// Delay before retrying after the given zero-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let jitter = (base * 0.1 * jitter_fraction(attempt)) as u64;
        let delay = (base as u64).saturating_add(jitter);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Simple deterministic jitter based on attempt number (no external rand crate needed).
fn jitter_fraction(attempt: u32) -> f64 {
    let x = attempt.wrapping_mul(2654435761);
    (x % 100) as f64 / 100.0
}

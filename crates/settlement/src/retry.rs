//! Bounded retry with exponential backoff. One policy object is shared by
//! the reference generator and the payout submission step; nothing in the
//! settlement path retries without a fixed attempt budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first try.
    pub max_attempts: u32,
    /// Initial backoff duration in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum backoff duration in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff multiplier per attempt.
    pub multiplier: f64,
    /// Whether to add jitter.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Compute the backoff duration for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_delay_ms as f64);

        let final_ms = if self.jitter {
            // Deterministic jitter: vary by up to 25% based on the attempt.
            let jitter_factor = 0.75 + (attempt as f64 * 0.1 % 0.5);
            capped_ms * jitter_factor
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms as u64)
    }

    /// Whether another attempt is allowed after `attempt` (0-indexed) failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Randomize each delay within [50%, 100%] of its nominal value.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// No waiting between attempts; used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let nominal = (self.initial_delay_ms as f64) * self.multiplier.powi(exponent);
        let capped = nominal.min(self.max_delay_ms as f64).max(0.0);
        let millis = if self.jitter && capped > 0.0 {
            rand::thread_rng().gen_range(capped / 2.0..=capped)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }
}

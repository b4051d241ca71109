//! Capped exponential backoff between failed connection attempts.
//!
//! The delay for attempt `n` (0-indexed) is `initial × factor^n`, clamped to
//! `max`. Retries never stop; the policy only spaces them out. A policy with
//! a zero `max` reproduces a tight reconnect loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    /// Upper bound for any single delay.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// Growth factor applied per consecutive failure.
    #[serde(default = "default_factor")]
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            factor: default_factor(),
        }
    }
}

impl BackoffPolicy {
    /// No delay at all between attempts.
    pub fn immediate() -> Self {
        Self {
            initial_ms: 0,
            max_ms: 0,
            factor: 1.0,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = if self.factor.is_finite() && self.factor >= 1.0 {
            self.factor
        } else {
            1.0
        };
        // powi saturates to +inf for large attempts, which min() then caps.
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base = self.initial_ms as f64 * factor.powi(exponent);
        let capped = base.min(self.max_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

fn default_initial_ms() -> u64 {
    100
}

fn default_max_ms() -> u64 {
    30_000
}

fn default_factor() -> f64 {
    2.0
}
